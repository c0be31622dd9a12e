//! Continuous monitoring of granted sessions
//!
//! Each monitored session gets one background task that wakes on a fixed
//! interval, re-checks conditions and runs ongoing obligations, and stops
//! the session with a reason when either fails. A session's stop is the
//! cancellation signal: the task notices it on its next tick and exits.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use ucon_api::ObligationPhase;
use ucon_config::MIN_MONITOR_INTERVAL;
use ucon_store::{AuditEvent, AuditEventType, AuditLog, Session};
use ucon_util::{Result, SessionId, UconError};

use crate::{ConditionRegistry, ObligationRegistry, UconEvent};

/// Monitoring state of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Never monitored
    Idle,
    /// A monitor task is live
    Monitoring,
    /// The monitor was disabled or has exited
    Stopped,
}

/// Everything a monitor task needs, shared with the spawning `Monitor`
pub(crate) struct MonitorContext {
    pub conditions: Arc<ConditionRegistry>,
    pub obligations: Arc<ObligationRegistry>,
    pub audit: Arc<dyn AuditLog>,
    pub events: broadcast::Sender<UconEvent>,
    pub interval: Duration,
}

struct MonitorSlot {
    /// Read and written only under its own lock, by the task and by `disable`
    enabled: Arc<Mutex<bool>>,
    task: JoinHandle<()>,
}

impl MonitorSlot {
    fn is_running(&self) -> bool {
        *lock(&self.enabled) && !self.task.is_finished()
    }
}

enum TickOutcome {
    Continue,
    Exit,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of all monitor tasks, keyed by session
pub struct Monitor {
    ctx: Arc<MonitorContext>,
    slots: Mutex<HashMap<SessionId, MonitorSlot>>,
}

impl Monitor {
    pub(crate) fn new(mut ctx: MonitorContext) -> Self {
        ctx.interval = ctx.interval.max(MIN_MONITOR_INTERVAL);
        Self {
            ctx: Arc::new(ctx),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.ctx.interval
    }

    /// Spawn a monitor for the session; a no-op if one is already running.
    ///
    /// Requires a Tokio runtime. Fails with `StateConflict` if the session
    /// is no longer active.
    pub fn start(&self, session: Arc<Session>) -> Result<()> {
        let runtime = Handle::try_current()
            .map_err(|_| UconError::conflict("monitoring requires a running Tokio runtime"))?;

        let mut slots = lock(&self.slots);
        if slots.get(session.id()).is_some_and(MonitorSlot::is_running) {
            debug!(session_id = %session.id(), "Session already monitored");
            return Ok(());
        }

        if !session.is_active() {
            return Err(UconError::conflict(format!(
                "session {} is not active and cannot be monitored",
                session.id()
            )));
        }

        let session_id = session.id().clone();
        let enabled = Arc::new(Mutex::new(true));
        let task = runtime.spawn(run_monitor(self.ctx.clone(), session, enabled.clone()));
        slots.insert(session_id.clone(), MonitorSlot { enabled, task });

        info!(
            session_id = %session_id,
            interval_ms = self.ctx.interval.as_millis() as u64,
            "Monitoring started"
        );
        let _ = self
            .ctx
            .events
            .send(UconEvent::MonitoringStarted { session_id });
        Ok(())
    }

    /// Turn monitoring off without touching the session.
    ///
    /// Waits for an in-flight tick to finish, so once this returns the task
    /// will not act on the session again. Returns whether the session was
    /// being monitored.
    pub fn disable(&self, session_id: &SessionId) -> bool {
        let enabled = match lock(&self.slots).get(session_id) {
            Some(slot) => slot.enabled.clone(),
            None => return false,
        };

        let mut enabled = lock(&enabled);
        let was_enabled = *enabled;
        *enabled = false;

        if was_enabled {
            debug!(session_id = %session_id, "Monitoring disabled");
        }
        was_enabled
    }

    /// Disable and drop the bookkeeping for a session
    pub fn forget(&self, session_id: &SessionId) {
        self.disable(session_id);
        lock(&self.slots).remove(session_id);
    }

    pub fn state(&self, session_id: &SessionId) -> MonitorState {
        match lock(&self.slots).get(session_id) {
            None => MonitorState::Idle,
            Some(slot) if slot.is_running() => MonitorState::Monitoring,
            Some(_) => MonitorState::Stopped,
        }
    }

    /// Number of live monitor tasks
    pub fn active_count(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|slot| slot.is_running())
            .count()
    }

    /// Abort every monitor task
    pub fn shutdown(&self) {
        let mut slots = lock(&self.slots);
        for (session_id, slot) in slots.drain() {
            *lock(&slot.enabled) = false;
            slot.task.abort();
            debug!(session_id = %session_id, "Monitor aborted");
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_monitor(ctx: Arc<MonitorContext>, session: Arc<Session>, enabled: Arc<Mutex<bool>>) {
    let mut ticker = tokio::time::interval(ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match panic::catch_unwind(AssertUnwindSafe(|| ctx.tick(&session, &enabled))) {
            Ok(TickOutcome::Continue) => {}
            Ok(TickOutcome::Exit) => break,
            Err(payload) => {
                // A panicked tick still ends the session
                let mut enabled = lock(&enabled);
                if *enabled {
                    *enabled = false;
                    let reason = format!("monitor failure: {}", panic_message(&*payload));
                    ctx.revoke(&session, reason);
                }
                break;
            }
        }
    }

    debug!(session_id = %session.id(), "Monitor exited");
    let _ = ctx.events.send(UconEvent::MonitoringStopped {
        session_id: session.id().clone(),
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "panic"
    }
}

impl MonitorContext {
    /// One monitoring pass. Holds the enable flag for the whole pass so a
    /// concurrent `disable` cannot interleave with a revocation.
    fn tick(&self, session: &Session, enabled: &Mutex<bool>) -> TickOutcome {
        let mut enabled = lock(enabled);

        if !*enabled {
            return TickOutcome::Exit;
        }

        if !session.is_active() {
            *enabled = false;
            return TickOutcome::Exit;
        }

        let revocation = match self.conditions.evaluate(session) {
            Ok(true) => None,
            Ok(false) => Some("condition no longer satisfied".to_string()),
            Err(e) => Some(format!("condition evaluation error: {e}")),
        };

        let revocation = revocation.or_else(|| {
            self.obligations
                .execute_phase(session, ObligationPhase::Ongoing)
                .err()
                .map(|e| format!("ongoing obligation failed: {e}"))
        });

        match revocation {
            None => {
                debug!(session_id = %session.id(), "Session still valid");
                TickOutcome::Continue
            }
            Some(reason) => {
                *enabled = false;
                self.revoke(session, reason);
                TickOutcome::Exit
            }
        }
    }

    fn revoke(&self, session: &Session, reason: String) {
        if let Err(e) = session.stop(reason.clone()) {
            debug!(session_id = %session.id(), error = %e, "Session ended before revocation");
            return;
        }

        warn!(session_id = %session.id(), reason = %reason, "Session revoked by monitor");

        // Log to audit
        let event = AuditEvent::new(AuditEventType::SessionStopped {
            session_id: session.id().clone(),
            reason: reason.clone(),
            duration: session.duration(),
        });
        if let Err(e) = self.audit.append_audit(event) {
            warn!(error = %e, "Failed to audit revocation");
        }

        let _ = self.events.send(UconEvent::SessionRevoked {
            session_id: session.id().clone(),
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use ucon_api::{Attributes, Condition, ConditionKind, Obligation};
    use ucon_store::{MemoryAuditLog, SessionStore};

    const TICK: Duration = Duration::from_millis(20);

    struct Fixture {
        store: SessionStore,
        conditions: Arc<ConditionRegistry>,
        obligations: Arc<ObligationRegistry>,
        events: broadcast::Receiver<UconEvent>,
        monitor: Monitor,
    }

    fn fixture() -> Fixture {
        fixture_with_interval(TICK)
    }

    fn fixture_with_interval(interval: Duration) -> Fixture {
        let audit: Arc<dyn AuditLog> = Arc::new(MemoryAuditLog::new(64));
        let conditions = Arc::new(ConditionRegistry::new());
        let obligations = Arc::new(ObligationRegistry::new(audit.clone()));
        let (events_tx, events) = broadcast::channel(64);
        let monitor = Monitor::new(MonitorContext {
            conditions: conditions.clone(),
            obligations: obligations.clone(),
            audit,
            events: events_tx,
            interval,
        });

        Fixture {
            store: SessionStore::new(),
            conditions,
            obligations,
            events,
            monitor,
        }
    }

    fn office_session(store: &SessionStore) -> Arc<Session> {
        let mut attributes = Attributes::new();
        attributes.insert("location".into(), json!("office"));
        let id = store
            .create_session("alice", "read", "document1", attributes)
            .unwrap();
        store.get_session(&id).unwrap()
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let f = fixture();
        let session = office_session(&f.store);

        assert_eq!(f.monitor.state(session.id()), MonitorState::Idle);
        f.monitor.start(session.clone()).unwrap();
        f.monitor.start(session.clone()).unwrap();

        assert_eq!(f.monitor.state(session.id()), MonitorState::Monitoring);
        assert_eq!(f.monitor.active_count(), 1);
    }

    #[tokio::test]
    async fn test_condition_violation_revokes() {
        let mut f = fixture();
        f.conditions
            .add(Condition::new("office", "location", ConditionKind::Always, "office"))
            .unwrap();
        let session = office_session(&f.store);
        f.monitor.start(session.clone()).unwrap();

        tokio::time::sleep(TICK * 2).await;
        assert!(session.is_active());

        session.update_attribute("location", "home");
        tokio::time::sleep(TICK * 3).await;

        assert!(!session.is_active());
        assert_eq!(
            session.stop_reason().as_deref(),
            Some("condition no longer satisfied")
        );
        assert_eq!(f.monitor.state(session.id()), MonitorState::Stopped);

        let mut revoked = false;
        while let Ok(event) = f.events.try_recv() {
            if matches!(event, UconEvent::SessionRevoked { .. }) {
                revoked = true;
            }
        }
        assert!(revoked);
    }

    #[tokio::test]
    async fn test_ongoing_obligation_failure_revokes() {
        let f = fixture();
        f.obligations
            .add(Obligation::new(
                "stay_auth",
                "user_authentication",
                ObligationPhase::Ongoing,
                "authenticated:true",
            ))
            .unwrap();
        let session = office_session(&f.store);
        f.monitor.start(session.clone()).unwrap();

        tokio::time::sleep(TICK * 3).await;

        assert!(!session.is_active());
        let reason = session.stop_reason().unwrap();
        assert!(reason.starts_with("ongoing obligation failed"), "{reason}");
    }

    #[tokio::test]
    async fn test_panicking_evaluator_revokes() {
        let f = fixture();
        f.conditions
            .register_evaluator("flaky", |_, _| panic!("evaluator exploded"));
        f.conditions
            .add(Condition::new("flaky", "flaky", ConditionKind::Always, ""))
            .unwrap();
        let session = office_session(&f.store);
        f.monitor.start(session.clone()).unwrap();

        tokio::time::sleep(TICK * 3).await;

        assert!(!session.is_active());
        assert_eq!(
            session.stop_reason().as_deref(),
            Some("monitor failure: evaluator exploded")
        );
        assert_eq!(f.monitor.state(session.id()), MonitorState::Stopped);
    }

    #[tokio::test]
    async fn test_zero_interval_still_monitors() {
        let f = fixture_with_interval(Duration::ZERO);
        assert_eq!(f.monitor.interval(), MIN_MONITOR_INTERVAL);

        f.conditions
            .add(Condition::new("office", "location", ConditionKind::Always, "office"))
            .unwrap();
        let session = office_session(&f.store);
        f.monitor.start(session.clone()).unwrap();

        tokio::time::sleep(TICK).await;
        assert_eq!(f.monitor.state(session.id()), MonitorState::Monitoring);

        session.update_attribute("location", "home");
        tokio::time::sleep(TICK).await;
        assert_eq!(
            session.stop_reason().as_deref(),
            Some("condition no longer satisfied")
        );
    }

    #[tokio::test]
    async fn test_external_stop_ends_monitor() {
        let f = fixture();
        let session = office_session(&f.store);
        f.monitor.start(session.clone()).unwrap();

        session.stop("").unwrap();
        tokio::time::sleep(TICK * 2 + TICK / 2).await;

        assert_eq!(f.monitor.state(session.id()), MonitorState::Stopped);
        assert_eq!(session.stop_reason().as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_disable_leaves_session_alone() {
        let f = fixture();
        f.conditions
            .add(Condition::new("office", "location", ConditionKind::Always, "office"))
            .unwrap();
        let session = office_session(&f.store);
        f.monitor.start(session.clone()).unwrap();

        assert!(f.monitor.disable(session.id()));
        session.update_attribute("location", "home");
        tokio::time::sleep(TICK * 3).await;

        assert!(session.is_active());
        assert_eq!(f.monitor.state(session.id()), MonitorState::Stopped);

        // An active session can be monitored again
        f.monitor.start(session.clone()).unwrap();
        tokio::time::sleep(TICK * 3).await;
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn test_inactive_session_rejected() {
        let f = fixture();
        let session = office_session(&f.store);
        session.stop("").unwrap();

        assert!(matches!(
            f.monitor.start(session),
            Err(UconError::StateConflict(_))
        ));
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let f = fixture();
        let session = office_session(&f.store);
        assert!(matches!(
            f.monitor.start(session),
            Err(UconError::StateConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_aborts_tasks() {
        let f = fixture();
        let session = office_session(&f.store);
        f.monitor.start(session.clone()).unwrap();

        f.monitor.shutdown();
        assert_eq!(f.monitor.state(session.id()), MonitorState::Idle);
        assert_eq!(f.monitor.active_count(), 0);
        assert!(session.is_active());
    }
}
