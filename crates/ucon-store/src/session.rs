//! Usage session entity

use chrono::{DateTime, Local};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::debug;
use ucon_api::{AttributeValue, Attributes, NORMAL_STOP_REASON, SessionInfo};
use ucon_util::{Result, SessionId, UconError};

/// One usage record, from creation until termination.
///
/// The request triple is immutable. Everything else sits behind the
/// session's own lock, so unrelated sessions never contend and every writer
/// (caller, obligation executor, monitor) is linearized.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    subject: String,
    action: String,
    object: String,

    /// Wall-clock start time (for display/logging)
    started_at: DateTime<Local>,

    /// Monotonic start time (for durations)
    started_at_mono: Instant,

    state: RwLock<SessionState>,
}

#[derive(Debug)]
struct SessionState {
    attributes: Attributes,
    lifecycle: Lifecycle,
}

/// `Stopped` is terminal; the end time and reason exist only there.
#[derive(Debug, Clone)]
enum Lifecycle {
    Active,
    Stopped {
        ended_at: DateTime<Local>,
        ended_at_mono: Instant,
        reason: String,
    },
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        subject: String,
        action: String,
        object: String,
        attributes: Attributes,
    ) -> Self {
        Self {
            id,
            subject,
            action,
            object,
            started_at: Local::now(),
            started_at_mono: Instant::now(),
            state: RwLock::new(SessionState {
                attributes,
                lifecycle: Lifecycle::Active,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    /// Current value of one attribute.
    ///
    /// Attribute reads hand out owned copies; no session lock is held once
    /// this returns, so evaluators and executors may freely update the
    /// session afterwards.
    pub fn attribute(&self, key: &str) -> Option<AttributeValue> {
        self.read().attributes.get(key).cloned()
    }

    /// Copy of the whole attribute set
    pub fn attributes(&self) -> Attributes {
        self.read().attributes.clone()
    }

    /// Set (or replace) a single attribute
    pub fn update_attribute(&self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        let key = key.into();
        let value = value.into();
        debug!(session_id = %self.id, key = %key, "Attribute updated");
        self.write().attributes.insert(key, value);
    }

    pub fn is_active(&self) -> bool {
        matches!(self.read().lifecycle, Lifecycle::Active)
    }

    /// Terminate the session.
    ///
    /// An empty reason marks a normal, caller-initiated stop; anything else
    /// is a revocation cause. Fails with `AlreadyStopped` if the session has
    /// already ended, leaving the recorded end time and reason untouched.
    pub fn stop(&self, reason: impl Into<String>) -> Result<()> {
        let mut state = self.write();
        if let Lifecycle::Stopped { .. } = state.lifecycle {
            return Err(UconError::AlreadyStopped(self.id.clone()));
        }

        let reason = reason.into();
        debug!(session_id = %self.id, reason = %reason, "Session stopped");
        state.lifecycle = Lifecycle::Stopped {
            ended_at: Local::now(),
            ended_at_mono: Instant::now(),
            reason,
        };
        Ok(())
    }

    /// `None` while active, `Some("")` after a normal stop
    pub fn stop_reason(&self) -> Option<String> {
        match &self.read().lifecycle {
            Lifecycle::Active => None,
            Lifecycle::Stopped { reason, .. } => Some(reason.clone()),
        }
    }

    /// Stopped by the system rather than by the caller
    pub fn is_revoked(&self) -> bool {
        match &self.read().lifecycle {
            Lifecycle::Active => false,
            Lifecycle::Stopped { reason, .. } => reason != NORMAL_STOP_REASON,
        }
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Set if and only if the session is no longer active
    pub fn ended_at(&self) -> Option<DateTime<Local>> {
        match &self.read().lifecycle {
            Lifecycle::Active => None,
            Lifecycle::Stopped { ended_at, .. } => Some(*ended_at),
        }
    }

    /// Time since start while active, total lifetime once stopped
    pub fn duration(&self) -> Duration {
        match &self.read().lifecycle {
            Lifecycle::Active => self.started_at_mono.elapsed(),
            Lifecycle::Stopped { ended_at_mono, .. } => {
                ended_at_mono.duration_since(self.started_at_mono)
            }
        }
    }

    /// Consistent snapshot for callers
    pub fn info(&self) -> SessionInfo {
        let state = self.read();
        let (active, ended_at, stop_reason, duration) = match &state.lifecycle {
            Lifecycle::Active => (true, None, None, self.started_at_mono.elapsed()),
            Lifecycle::Stopped {
                ended_at,
                ended_at_mono,
                reason,
            } => (
                false,
                Some(*ended_at),
                Some(reason.clone()),
                ended_at_mono.duration_since(self.started_at_mono),
            ),
        };

        SessionInfo {
            session_id: self.id.clone(),
            subject: self.subject.clone(),
            action: self.action.clone(),
            object: self.object.clone(),
            attributes: state.attributes.clone(),
            active,
            started_at: self.started_at,
            ended_at,
            stop_reason,
            duration,
        }
    }
}
