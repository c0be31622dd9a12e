//! In-memory session registry

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};
use ucon_api::{AttributeValue, Attributes};
use ucon_util::{Result, SessionId, UconError};

use crate::Session;

/// Concurrency-safe registry of sessions.
///
/// The store owns every `Session`; callers receive shared handles and mutate
/// them only through the session's own synchronized methods. The map lock is
/// held just long enough to insert, look up or remove an entry.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an active session for the (subject, action, object) request
    pub fn create_session(
        &self,
        subject: impl Into<String>,
        action: impl Into<String>,
        object: impl Into<String>,
        attributes: Attributes,
    ) -> Result<SessionId> {
        let (subject, action, object) = (subject.into(), action.into(), object.into());
        if subject.is_empty() || action.is_empty() || object.is_empty() {
            return Err(UconError::invalid(
                "subject, action and object must all be non-empty",
            ));
        }

        let session_id = SessionId::generate();
        let session = Session::new(session_id.clone(), subject, action, object, attributes);

        info!(
            session_id = %session_id,
            subject = %session.subject(),
            action = %session.action(),
            object = %session.object(),
            "Session created"
        );

        self.write().insert(session_id.clone(), Arc::new(session));
        Ok(session_id)
    }

    /// Look up a session handle
    pub fn get_session(&self, session_id: &SessionId) -> Result<Arc<Session>> {
        self.read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| UconError::SessionNotFound(session_id.clone()))
    }

    /// Set one attribute on a stored session
    pub fn update_session_attribute(
        &self,
        session_id: &SessionId,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Result<()> {
        self.get_session(session_id)?.update_attribute(key, value);
        Ok(())
    }

    /// Remove a terminated session.
    ///
    /// Deleting a session that is still active is a `StateConflict`: it has
    /// to be stopped first so that nothing keeps using a session the store no
    /// longer tracks.
    pub fn delete_session(&self, session_id: &SessionId) -> Result<Arc<Session>> {
        let mut sessions = self.write();
        let session = sessions
            .get(session_id)
            .ok_or_else(|| UconError::SessionNotFound(session_id.clone()))?;

        if session.is_active() {
            return Err(UconError::conflict(format!(
                "session {session_id} is still active and cannot be deleted"
            )));
        }

        let removed = sessions.remove(session_id);
        debug!(session_id = %session_id, "Session deleted");
        removed.ok_or_else(|| UconError::SessionNotFound(session_id.clone()))
    }

    /// IDs of every stored session, active or not
    pub fn list_sessions(&self) -> Vec<SessionId> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
