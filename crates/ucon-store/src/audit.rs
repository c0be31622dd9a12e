//! Audit event types

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use ucon_api::ObligationPhase;
use ucon_util::SessionId;

/// Types of audit events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Session registered for a (subject, action, object) request
    SessionCreated {
        session_id: SessionId,
        subject: String,
        action: String,
        object: String,
    },

    /// Access granted and monitoring started
    AccessGranted {
        session_id: SessionId,
        subject: String,
        action: String,
        object: String,
    },

    /// Access denied by conditions or by the policy decision
    AccessDenied {
        session_id: SessionId,
        reason: String,
    },

    /// Record written by an access-logging obligation
    AccessLogged {
        session_id: SessionId,
        subject: String,
        action: String,
        object: String,
        detail: String,
        phase: ObligationPhase,
    },

    /// Session ended, normally (empty reason) or by the monitor
    SessionStopped {
        session_id: SessionId,
        reason: String,
        duration: Duration,
    },

    /// Session revoked by an administrator and removed
    SessionRevoked { session_id: SessionId },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: u64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by the log
            timestamp: Local::now(),
            event,
        }
    }
}
