//! Usage-control enforcer
//!
//! Composes the session store, the condition and obligation registries, the
//! monitor and an external policy decision point into one protocol:
//! `enforce_with_session` to grant, `stop_monitoring` to end normally,
//! `revoke_session` to terminate administratively.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use ucon_api::{
    AttributeValue, Attributes, Condition, ConditionKind, NORMAL_STOP_REASON, Obligation,
    ObligationPhase,
};
use ucon_config::{EngineSettings, UconConfig};
use ucon_store::{AuditEvent, AuditEventType, AuditLog, MemoryAuditLog, Session, SessionStore};
use ucon_util::{ConditionId, ObligationId, Result, SessionId, UconError};

use crate::monitor::MonitorContext;
use crate::{
    ConditionRegistry, Monitor, MonitorState, ObligationContext, ObligationRegistry,
    PolicyDecisionPoint, UconEvent,
};

/// Stop reason recorded by `revoke_session`
pub const REVOKED_REASON: &str = "session revoked";

/// The usage-control engine
pub struct UconEnforcer {
    policy: Arc<dyn PolicyDecisionPoint>,
    sessions: Arc<SessionStore>,
    conditions: Arc<ConditionRegistry>,
    obligations: Arc<ObligationRegistry>,
    audit: Arc<dyn AuditLog>,
    monitor: Monitor,
    events: broadcast::Sender<UconEvent>,
}

impl UconEnforcer {
    /// Create an enforcer with default settings
    pub fn new(policy: Arc<dyn PolicyDecisionPoint>) -> Self {
        Self::with_settings(policy, EngineSettings::default())
    }

    /// Create an enforcer with an in-memory audit log sized from `settings`
    pub fn with_settings(policy: Arc<dyn PolicyDecisionPoint>, settings: EngineSettings) -> Self {
        let audit = Arc::new(MemoryAuditLog::new(settings.audit_capacity));
        Self::with_audit_log(policy, settings, audit)
    }

    pub fn with_audit_log(
        policy: Arc<dyn PolicyDecisionPoint>,
        settings: EngineSettings,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let conditions = Arc::new(ConditionRegistry::new());
        let obligations = Arc::new(ObligationRegistry::new(audit.clone()));

        let monitor = Monitor::new(MonitorContext {
            conditions: conditions.clone(),
            obligations: obligations.clone(),
            audit: audit.clone(),
            events: events.clone(),
            interval: settings.monitor_interval,
        });

        info!(
            monitor_interval_ms = settings.monitor_interval.as_millis() as u64,
            audit_capacity = settings.audit_capacity,
            "UCON enforcer initialized"
        );

        Self {
            policy,
            sessions: Arc::new(SessionStore::new()),
            conditions,
            obligations,
            audit,
            monitor,
            events,
        }
    }

    /// Build an enforcer from validated configuration, registering every
    /// configured condition and obligation
    pub fn from_config(config: &UconConfig, policy: Arc<dyn PolicyDecisionPoint>) -> Result<Self> {
        let enforcer = Self::with_settings(policy, config.engine);

        for condition in &config.conditions {
            enforcer.add_condition(condition.clone())?;
        }
        for obligation in &config.obligations {
            enforcer.add_obligation(obligation.clone())?;
        }

        Ok(enforcer)
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<UconEvent> {
        self.events.subscribe()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn audit_log(&self) -> &Arc<dyn AuditLog> {
        &self.audit
    }

    // Sessions

    pub fn create_session(
        &self,
        subject: impl Into<String>,
        action: impl Into<String>,
        object: impl Into<String>,
        attributes: Attributes,
    ) -> Result<SessionId> {
        let session_id = self
            .sessions
            .create_session(subject, action, object, attributes)?;
        let session = self.sessions.get_session(&session_id)?;

        // Log to audit
        self.audit(AuditEventType::SessionCreated {
            session_id: session_id.clone(),
            subject: session.subject().to_string(),
            action: session.action().to_string(),
            object: session.object().to_string(),
        });

        Ok(session_id)
    }

    pub fn get_session(&self, session_id: &SessionId) -> Result<Arc<Session>> {
        self.sessions.get_session(session_id)
    }

    pub fn update_session_attribute(
        &self,
        session_id: &SessionId,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Result<()> {
        self.sessions.update_session_attribute(session_id, key, value)
    }

    /// Remove a terminated session
    pub fn delete_session(&self, session_id: &SessionId) -> Result<()> {
        self.sessions.delete_session(session_id)?;
        self.monitor.forget(session_id);
        Ok(())
    }

    /// Terminate a session immediately and remove it from the store.
    ///
    /// An active session is stopped with `REVOKED_REASON`; post obligations
    /// do not run. A session that already ended is simply removed.
    pub fn revoke_session(&self, session_id: &SessionId) -> Result<()> {
        let session = self.sessions.get_session(session_id)?;

        // No tick may act on the session past this point
        self.monitor.disable(session_id);

        match session.stop(REVOKED_REASON) {
            Ok(()) => {
                warn!(session_id = %session_id, "Session revoked");
                let _ = self.events.send(UconEvent::SessionRevoked {
                    session_id: session_id.clone(),
                    reason: REVOKED_REASON.to_string(),
                });
            }
            Err(UconError::AlreadyStopped(_)) => {
                debug!(session_id = %session_id, "Revoking a session that already ended");
            }
            Err(e) => return Err(e),
        }

        // Log to audit
        self.audit(AuditEventType::SessionRevoked {
            session_id: session_id.clone(),
        });

        self.delete_session(session_id)
    }

    // Conditions

    pub fn add_condition(&self, condition: Condition) -> Result<()> {
        self.conditions.add(condition)
    }

    pub fn remove_condition(&self, id: &ConditionId) -> Result<Condition> {
        self.conditions.remove(id)
    }

    pub fn conditions(&self) -> Vec<Condition> {
        self.conditions.list()
    }

    /// Extend condition dispatch with a new evaluator
    pub fn register_condition_evaluator<F>(&self, name: impl Into<String>, evaluator: F)
    where
        F: Fn(&str, &Session) -> Result<bool> + Send + Sync + 'static,
    {
        self.conditions.register_evaluator(name, evaluator);
    }

    /// Check every condition against the session; vacuously true when none
    /// are registered
    pub fn evaluate_conditions(&self, session_id: &SessionId) -> Result<bool> {
        let session = self.sessions.get_session(session_id)?;
        self.conditions.evaluate(&session)
    }

    pub fn evaluate_conditions_by_kind(
        &self,
        session_id: &SessionId,
        kind: ConditionKind,
    ) -> Result<bool> {
        let session = self.sessions.get_session(session_id)?;
        self.conditions.evaluate_kind(&session, kind)
    }

    // Obligations

    pub fn add_obligation(&self, obligation: Obligation) -> Result<()> {
        self.obligations.add(obligation)
    }

    pub fn remove_obligation(&self, id: &ObligationId) -> Result<Obligation> {
        self.obligations.remove(id)
    }

    pub fn obligations(&self) -> Vec<Obligation> {
        self.obligations.list()
    }

    /// Extend obligation dispatch with a new executor
    pub fn register_obligation_executor<F>(&self, name: impl Into<String>, executor: F)
    where
        F: Fn(&str, &ObligationContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.obligations.register_executor(name, executor);
    }

    /// Run every obligation regardless of phase
    pub fn execute_obligations(&self, session_id: &SessionId) -> Result<()> {
        let session = self.sessions.get_session(session_id)?;
        self.obligations.execute_all(&session)
    }

    pub fn execute_obligations_by_phase(
        &self,
        session_id: &SessionId,
        phase: ObligationPhase,
    ) -> Result<()> {
        let session = self.sessions.get_session(session_id)?;
        self.obligations.execute_phase(&session, phase)
    }

    // Monitoring

    /// Start continuous monitoring; a no-op if the session is already monitored
    pub fn start_monitoring(&self, session_id: &SessionId) -> Result<()> {
        let session = self.sessions.get_session(session_id)?;
        self.monitor.start(session)
    }

    /// End a session normally.
    ///
    /// Post obligations run best-effort, even when the monitor has already
    /// revoked the session; their failures are logged, never returned. The
    /// session is then stopped with an empty reason if it is still active.
    pub fn stop_monitoring(&self, session_id: &SessionId) -> Result<()> {
        let session = self.sessions.get_session(session_id)?;
        self.monitor.disable(session_id);

        if let Err(e) = self.obligations.execute_phase(&session, ObligationPhase::Post) {
            warn!(session_id = %session_id, error = %e, "Post obligations failed");
        }

        match session.stop(NORMAL_STOP_REASON) {
            Ok(()) => {
                let duration = session.duration();
                info!(
                    session_id = %session_id,
                    duration_secs = duration.as_secs(),
                    "Session ended"
                );

                // Log to audit
                self.audit(AuditEventType::SessionStopped {
                    session_id: session_id.clone(),
                    reason: NORMAL_STOP_REASON.to_string(),
                    duration,
                });

                let _ = self.events.send(UconEvent::SessionEnded {
                    session_id: session_id.clone(),
                    duration,
                });
            }
            Err(UconError::AlreadyStopped(_)) => {
                debug!(
                    session_id = %session_id,
                    reason = ?session.stop_reason(),
                    "Session had already ended"
                );
            }
            Err(e) => return Err(e),
        }

        Ok(())
    }

    pub fn monitor_state(&self, session_id: &SessionId) -> MonitorState {
        self.monitor.state(session_id)
    }

    /// Abort every monitor task
    pub fn shutdown(&self) {
        info!("Shutting down monitors");
        self.monitor.shutdown();
    }

    /// Decide whether the session may proceed.
    ///
    /// Returns the live session on grant and `None` on a clean denial. An
    /// error means the decision could not be computed: the session is
    /// unknown, a condition could not be evaluated, a pre obligation failed,
    /// or the policy decision point failed. Nothing past a failed step runs.
    /// A session that ends while the policy is deciding is a clean denial.
    pub async fn enforce_with_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<Arc<Session>>> {
        let session = self.sessions.get_session(session_id)?;

        if !session.is_active() {
            return Ok(self.deny(&session, "session is not active"));
        }

        if !self.conditions.evaluate(&session)? {
            return Ok(self.deny(&session, "conditions not satisfied"));
        }

        if let Err(e) = self.obligations.execute_phase(&session, ObligationPhase::Pre) {
            let _ = self.deny(&session, &format!("pre obligation failed: {e}"));
            return Err(e);
        }

        let granted = self
            .policy
            .authorize(session.subject(), session.action(), session.object())
            .await
            .map_err(UconError::decision)?;

        if !granted {
            return Ok(self.deny(&session, "policy decision denied"));
        }

        match self.monitor.start(session.clone()) {
            Ok(()) => {}
            // Stopped while the decision was being made
            Err(UconError::StateConflict(_)) if !session.is_active() => {
                return Ok(self.deny(&session, "session ended before monitoring started"));
            }
            Err(e) => return Err(e),
        }

        info!(
            session_id = %session_id,
            subject = %session.subject(),
            action = %session.action(),
            object = %session.object(),
            "Access granted"
        );

        // Log to audit
        self.audit(AuditEventType::AccessGranted {
            session_id: session_id.clone(),
            subject: session.subject().to_string(),
            action: session.action().to_string(),
            object: session.object().to_string(),
        });

        let _ = self.events.send(UconEvent::AccessGranted {
            session_id: session_id.clone(),
        });

        Ok(Some(session))
    }

    fn deny(&self, session: &Session, reason: &str) -> Option<Arc<Session>> {
        info!(session_id = %session.id(), reason, "Access denied");

        self.audit(AuditEventType::AccessDenied {
            session_id: session.id().clone(),
            reason: reason.to_string(),
        });

        let _ = self.events.send(UconEvent::AccessDenied {
            session_id: session.id().clone(),
            reason: reason.to_string(),
        });

        None
    }

    fn audit(&self, event: AuditEventType) {
        if let Err(e) = self.audit.append_audit(AuditEvent::new(event)) {
            warn!(error = %e, "Failed to write audit record");
        }
    }
}
