//! Events emitted by the engine

use std::time::Duration;
use ucon_util::SessionId;

/// Events emitted by the enforcer and its monitors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UconEvent {
    /// Access granted; the session is now monitored
    AccessGranted { session_id: SessionId },

    /// Access denied without error
    AccessDenied {
        session_id: SessionId,
        reason: String,
    },

    /// A monitor task was spawned for the session
    MonitoringStarted { session_id: SessionId },

    /// The session was terminated by the system (monitor or administrator)
    SessionRevoked {
        session_id: SessionId,
        reason: String,
    },

    /// The session ended normally through `stop_monitoring`
    SessionEnded {
        session_id: SessionId,
        duration: Duration,
    },

    /// The monitor task for the session has exited
    MonitoringStopped { session_id: SessionId },
}

impl UconEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::AccessGranted { session_id }
            | Self::AccessDenied { session_id, .. }
            | Self::MonitoringStarted { session_id }
            | Self::SessionRevoked { session_id, .. }
            | Self::SessionEnded { session_id, .. }
            | Self::MonitoringStopped { session_id } => session_id,
        }
    }
}
