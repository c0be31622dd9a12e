//! Mock policy decision point for testing

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::{DecisionError, DecisionResult, PolicyDecisionPoint};

/// Policy decision point with a scripted answer that records its calls
#[derive(Debug)]
pub struct MockPolicy {
    calls: AtomicUsize,
    last_request: Mutex<Option<(String, String, String)>>,

    /// Decision returned by `authorize`
    pub decision: Arc<Mutex<bool>>,

    /// When set, `authorize` fails with this message
    pub failure: Arc<Mutex<Option<String>>>,
}

impl MockPolicy {
    pub fn new(decision: bool) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
            decision: Arc::new(Mutex::new(decision)),
            failure: Arc::new(Mutex::new(None)),
        }
    }

    pub fn granting() -> Self {
        Self::new(true)
    }

    pub fn denying() -> Self {
        Self::new(false)
    }

    /// Make every following call fail
    pub fn set_failure(&self, message: impl Into<String>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.into());
    }

    pub fn set_decision(&self, decision: bool) {
        *self.decision.lock().unwrap_or_else(PoisonError::into_inner) = decision;
    }

    /// How many times `authorize` has been invoked
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The most recent (subject, action, object) seen
    pub fn last_request(&self) -> Option<(String, String, String)> {
        self.last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for MockPolicy {
    fn default() -> Self {
        Self::granting()
    }
}

#[async_trait]
impl PolicyDecisionPoint for MockPolicy {
    async fn authorize(&self, subject: &str, action: &str, object: &str) -> DecisionResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((subject.to_string(), action.to_string(), object.to_string()));

        if let Some(message) = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(DecisionError::Unavailable(message));
        }

        Ok(*self.decision.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
