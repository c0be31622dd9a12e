//! Validated configuration ready for use by the engine

use crate::schema::{RawConfig, RawEngineConfig};
use crate::{ConfigError, ConfigResult, ValidationError};
use std::time::Duration;
use ucon_api::{Condition, ConditionKind, Obligation, ObligationPhase};

/// Default monitor tick interval
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_millis(200);

/// Shortest monitor tick interval; smaller values are raised to it
pub const MIN_MONITOR_INTERVAL: Duration = Duration::from_millis(1);

/// Default number of audit records kept in memory
pub const DEFAULT_AUDIT_CAPACITY: usize = 1024;

/// Default buffer size of the engine event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Validated configuration
#[derive(Debug, Clone, Default)]
pub struct UconConfig {
    pub engine: EngineSettings,
    pub conditions: Vec<Condition>,
    pub obligations: Vec<Obligation>,
}

impl UconConfig {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> ConfigResult<Self> {
        let mut errors = Vec::new();

        let mut conditions = Vec::with_capacity(raw.conditions.len());
        for c in raw.conditions {
            match c.kind.parse::<ConditionKind>() {
                Ok(kind) => conditions.push(Condition::new(c.id, c.name, kind, c.expr)),
                Err(e) => errors.push(ValidationError::ConditionError {
                    condition_id: c.id,
                    message: e.to_string(),
                }),
            }
        }

        let mut obligations = Vec::with_capacity(raw.obligations.len());
        for o in raw.obligations {
            match o.phase.parse::<ObligationPhase>() {
                Ok(phase) => obligations.push(Obligation::new(o.id, o.name, phase, o.expr)),
                Err(e) => errors.push(ValidationError::ObligationError {
                    obligation_id: o.id,
                    message: e.to_string(),
                }),
            }
        }

        if !errors.is_empty() {
            return Err(ConfigError::ValidationFailed { errors });
        }

        Ok(Self {
            engine: EngineSettings::from_raw(&raw.engine),
            conditions,
            obligations,
        })
    }
}

/// Engine tuning parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// How often each monitor re-checks its session
    pub monitor_interval: Duration,

    /// Audit records retained by the in-memory audit log
    pub audit_capacity: usize,

    /// Engine event channel buffer
    pub event_capacity: usize,
}

impl EngineSettings {
    fn from_raw(raw: &RawEngineConfig) -> Self {
        Self {
            monitor_interval: raw
                .monitor_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_MONITOR_INTERVAL),
            audit_capacity: raw.audit_capacity.unwrap_or(DEFAULT_AUDIT_CAPACITY),
            event_capacity: raw.event_capacity.unwrap_or(DEFAULT_EVENT_CAPACITY),
        }
    }

    /// Override the monitor interval, never going below `MIN_MONITOR_INTERVAL`
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval.max(MIN_MONITOR_INTERVAL);
        self
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}
