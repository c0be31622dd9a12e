//! Configuration validation

use crate::schema::{RawConfig, RawEngineConfig};
use std::collections::HashSet;
use thiserror::Error;
use ucon_api::{ConditionKind, ObligationPhase};

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Condition '{condition_id}': {message}")]
    ConditionError {
        condition_id: String,
        message: String,
    },

    #[error("Obligation '{obligation_id}': {message}")]
    ObligationError {
        obligation_id: String,
        message: String,
    },

    #[error("Duplicate condition ID: {0}")]
    DuplicateConditionId(String),

    #[error("Duplicate obligation ID: {0}")]
    DuplicateObligationId(String),

    #[error("Engine config error: {0}")]
    EngineError(String),
}

/// Validate a raw configuration, collecting every problem found
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = validate_engine(&config.engine);

    let mut seen = HashSet::new();
    for condition in &config.conditions {
        if !seen.insert(&condition.id) {
            errors.push(ValidationError::DuplicateConditionId(condition.id.clone()));
        }

        let mut fail = |message: String| {
            errors.push(ValidationError::ConditionError {
                condition_id: condition.id.clone(),
                message,
            })
        };
        if condition.id.is_empty() {
            fail("id cannot be empty".into());
        }
        if condition.name.is_empty() {
            fail("name cannot be empty".into());
        }
        if condition.kind.parse::<ConditionKind>().is_err() {
            fail(format!("unknown kind '{}'", condition.kind));
        }
    }

    let mut seen = HashSet::new();
    for obligation in &config.obligations {
        if !seen.insert(&obligation.id) {
            errors.push(ValidationError::DuplicateObligationId(obligation.id.clone()));
        }

        let mut fail = |message: String| {
            errors.push(ValidationError::ObligationError {
                obligation_id: obligation.id.clone(),
                message,
            })
        };
        if obligation.id.is_empty() {
            fail("id cannot be empty".into());
        }
        if obligation.name.is_empty() {
            fail("name cannot be empty".into());
        }
        if obligation.phase.parse::<ObligationPhase>().is_err() {
            fail(format!("unknown phase '{}'", obligation.phase));
        }
    }

    errors
}

fn validate_engine(engine: &RawEngineConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if engine.monitor_interval_ms == Some(0) {
        errors.push(ValidationError::EngineError(
            "monitor_interval_ms must be greater than zero".into(),
        ));
    }
    if engine.audit_capacity == Some(0) {
        errors.push(ValidationError::EngineError(
            "audit_capacity must be greater than zero".into(),
        ));
    }
    if engine.event_capacity == Some(0) {
        errors.push(ValidationError::EngineError(
            "event_capacity must be greater than zero".into(),
        ));
    }

    errors
}
