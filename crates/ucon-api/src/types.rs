//! Condition, obligation and session snapshot types

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use ucon_util::{ConditionId, ObligationId, Result, SessionId, UconError};

/// Attribute values attached to a session
pub type AttributeValue = serde_json::Value;

/// Session attribute set, keyed by attribute name
pub type Attributes = HashMap<String, AttributeValue>;

/// Stop reason recorded for a caller-initiated, normal termination
pub const NORMAL_STOP_REASON: &str = "";

/// Evaluation cadence of a condition.
///
/// Informational: the evaluator checks every registered condition unless the
/// caller filters by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// Checked only when access is requested
    One,
    /// Re-checked on every monitor tick
    Always,
}

impl ConditionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::One => "one",
            Self::Always => "always",
        }
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConditionKind {
    type Err = UconError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "one" => Ok(Self::One),
            "always" => Ok(Self::Always),
            other => Err(UconError::invalid(format!("unknown condition kind '{other}'"))),
        }
    }
}

/// Lifecycle phase an obligation is tied to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationPhase {
    /// Before access is granted; failure denies access
    Pre,
    /// On every monitor tick while access is held
    Ongoing,
    /// When access ends normally
    Post,
}

impl ObligationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Ongoing => "ongoing",
            Self::Post => "post",
        }
    }
}

impl fmt::Display for ObligationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObligationPhase {
    type Err = UconError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pre" => Ok(Self::Pre),
            "ongoing" => Ok(Self::Ongoing),
            "post" => Ok(Self::Post),
            other => Err(UconError::invalid(format!("unknown obligation phase '{other}'"))),
        }
    }
}

/// A named predicate over session attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Registry key; a later definition with the same ID replaces this one
    pub id: ConditionId,

    /// Evaluator dispatch key (e.g. "location")
    pub name: String,

    pub kind: ConditionKind,

    /// Parameter handed to the evaluator
    pub expr: String,
}

impl Condition {
    pub fn new(
        id: impl Into<ConditionId>,
        name: impl Into<String>,
        kind: ConditionKind,
        expr: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            expr: expr.into(),
        }
    }

    /// Reject definitions that could never be dispatched
    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().is_empty() {
            return Err(UconError::invalid("condition id cannot be empty"));
        }
        if self.name.is_empty() {
            return Err(UconError::invalid(format!(
                "condition {} has an empty name",
                self.id
            )));
        }
        Ok(())
    }
}

/// A mandatory side-effecting action bound to a lifecycle phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obligation {
    pub id: ObligationId,

    /// Executor dispatch key (e.g. "user_authentication")
    pub name: String,

    pub phase: ObligationPhase,

    /// Parameter handed to the executor, often "key:value"
    pub expr: String,
}

impl Obligation {
    pub fn new(
        id: impl Into<ObligationId>,
        name: impl Into<String>,
        phase: ObligationPhase,
        expr: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            phase,
            expr: expr.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().is_empty() {
            return Err(UconError::invalid("obligation id cannot be empty"));
        }
        if self.name.is_empty() {
            return Err(UconError::invalid(format!(
                "obligation {} has an empty name",
                self.id
            )));
        }
        Ok(())
    }
}

/// Point-in-time view of a session, safe to hand across threads or serialize
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub subject: String,
    pub action: String,
    pub object: String,
    pub attributes: Attributes,
    pub active: bool,
    pub started_at: DateTime<Local>,
    pub ended_at: Option<DateTime<Local>>,
    /// `None` while active, `Some("")` after a normal stop
    pub stop_reason: Option<String>,
    pub duration: Duration,
}

impl SessionInfo {
    /// Stopped by the system rather than by the caller
    pub fn is_revoked(&self) -> bool {
        self.stop_reason
            .as_deref()
            .is_some_and(|reason| reason != NORMAL_STOP_REASON)
    }
}
