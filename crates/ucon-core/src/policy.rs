//! Policy decision point interface

use async_trait::async_trait;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tracing::debug;
use ucon_util::BoxError;

/// Errors from a policy decision point
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("Policy backend unavailable: {0}")]
    Unavailable(String),

    #[error("Policy backend error: {0}")]
    Backend(#[source] BoxError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type DecisionResult<T> = Result<T, DecisionError>;

/// The external yes/no authorization oracle.
///
/// This is the engine's only dependency on an authorization engine; any
/// implementation can be plugged in.
#[async_trait]
pub trait PolicyDecisionPoint: Send + Sync {
    /// Decide whether `subject` may perform `action` on `object`
    async fn authorize(&self, subject: &str, action: &str, object: &str) -> DecisionResult<bool>;
}

/// Wildcard accepted in any position of a [`PolicyRule`]
pub const WILDCARD: &str = "*";

/// One allow rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    pub subject: String,
    pub action: String,
    pub object: String,
}

impl PolicyRule {
    pub fn new(
        subject: impl Into<String>,
        action: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            action: action.into(),
            object: object.into(),
        }
    }

    fn matches(&self, subject: &str, action: &str, object: &str) -> bool {
        let field = |rule: &str, value: &str| rule == WILDCARD || rule == value;
        field(&self.subject, subject) && field(&self.action, action) && field(&self.object, object)
    }
}

/// In-memory allow-list; anything not explicitly allowed is denied
#[derive(Debug, Default)]
pub struct StaticPolicy {
    rules: RwLock<Vec<PolicyRule>>,
}

impl StaticPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: impl IntoIterator<Item = PolicyRule>) -> Self {
        Self {
            rules: RwLock::new(rules.into_iter().collect()),
        }
    }

    pub fn allow(
        &self,
        subject: impl Into<String>,
        action: impl Into<String>,
        object: impl Into<String>,
    ) {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PolicyRule::new(subject, action, object));
    }

    pub fn len(&self) -> usize {
        self.rules.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PolicyDecisionPoint for StaticPolicy {
    async fn authorize(&self, subject: &str, action: &str, object: &str) -> DecisionResult<bool> {
        let granted = self
            .rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|rule| rule.matches(subject, action, object));

        debug!(subject, action, object, granted, "Static policy decision");
        Ok(granted)
    }
}
