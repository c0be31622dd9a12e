//! Error types for ucon

use thiserror::Error;

use crate::{ConditionId, ObligationId, SessionId};

/// Boxed error produced by an external collaborator
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Core error type for ucon operations
#[derive(Debug, Error)]
pub enum UconError {
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Condition not found: {0}")]
    ConditionNotFound(ConditionId),

    #[error("Obligation not found: {0}")]
    ObligationNotFound(ObligationId),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Session already stopped: {0}")]
    AlreadyStopped(SessionId),

    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Requirement not satisfied: {0}")]
    Unsatisfied(String),

    #[error("Failed to execute {phase} obligation {obligation_id}: {source}")]
    ObligationFailed {
        obligation_id: ObligationId,
        phase: String,
        #[source]
        source: Box<UconError>,
    },

    /// The policy decision could not be computed; the collaborator's error is
    /// kept intact as the source.
    #[error("Policy decision failed: {0}")]
    Decision(#[source] BoxError),
}

impl UconError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::StateConflict(msg.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

    pub fn unsatisfied(msg: impl Into<String>) -> Self {
        Self::Unsatisfied(msg.into())
    }

    pub fn decision(err: impl Into<BoxError>) -> Self {
        Self::Decision(err.into())
    }

    /// Whether this error reports an unknown session, condition or obligation
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound(_) | Self::ConditionNotFound(_) | Self::ObligationNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, UconError>;
