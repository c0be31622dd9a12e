//! Obligation registry and execution

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};
use ucon_api::{AttributeValue, Obligation, ObligationPhase};
use ucon_store::{AuditEvent, AuditEventType, AuditLog, Session};
use ucon_util::{ObligationId, Result, UconError};

/// What an executor gets to work with
pub struct ObligationContext<'a> {
    pub session: &'a Session,
    pub phase: ObligationPhase,
    pub audit: &'a dyn AuditLog,
}

/// Executor for one obligation name: `(expr, context) -> ()`
pub type ObligationExecutor =
    Arc<dyn Fn(&str, &ObligationContext<'_>) -> Result<()> + Send + Sync>;

/// Registry of global, phase-tagged obligations plus the executor table
pub struct ObligationRegistry {
    obligations: RwLock<HashMap<ObligationId, Obligation>>,
    executors: RwLock<HashMap<String, ObligationExecutor>>,
    audit: Arc<dyn AuditLog>,
}

impl ObligationRegistry {
    /// Create a registry with the built-in executors
    pub fn new(audit: Arc<dyn AuditLog>) -> Self {
        let registry = Self {
            obligations: RwLock::new(HashMap::new()),
            executors: RwLock::new(HashMap::new()),
            audit,
        };
        registry.register_executor("user_authentication", execute_user_authentication);
        registry.register_executor("access_logging", execute_access_logging);
        registry.register_executor("vip_validation", execute_vip_validation);
        registry.register_executor("set_attribute", execute_set_attribute);
        registry
    }

    /// Register (or replace) the executor for an obligation name
    pub fn register_executor<F>(&self, name: impl Into<String>, executor: F)
    where
        F: Fn(&str, &ObligationContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.executors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(executor));
    }

    /// Add an obligation; an obligation with the same ID is replaced
    pub fn add(&self, obligation: Obligation) -> Result<()> {
        obligation.validate()?;

        info!(
            obligation_id = %obligation.id,
            name = %obligation.name,
            phase = %obligation.phase,
            "Obligation registered"
        );

        self.obligations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(obligation.id.clone(), obligation);
        Ok(())
    }

    pub fn remove(&self, id: &ObligationId) -> Result<Obligation> {
        self.obligations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or_else(|| UconError::ObligationNotFound(id.clone()))
    }

    pub fn list(&self) -> Vec<Obligation> {
        self.obligations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.obligations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every registered obligation regardless of phase
    pub fn execute_all(&self, session: &Session) -> Result<()> {
        self.execute_matching(session, None)
    }

    /// Run the obligations of one phase.
    ///
    /// Order among obligations of the same phase is unspecified. The first
    /// failure aborts the rest of the batch and is reported as
    /// `ObligationFailed` carrying the obligation's ID and cause.
    pub fn execute_phase(&self, session: &Session, phase: ObligationPhase) -> Result<()> {
        self.execute_matching(session, Some(phase))
    }

    fn execute_matching(&self, session: &Session, phase: Option<ObligationPhase>) -> Result<()> {
        let snapshot: Vec<(Obligation, Option<ObligationExecutor>)> = {
            let obligations = self.obligations.read().unwrap_or_else(PoisonError::into_inner);
            let executors = self.executors.read().unwrap_or_else(PoisonError::into_inner);
            obligations
                .values()
                .filter(|o| phase.is_none_or(|p| o.phase == p))
                .map(|o| (o.clone(), executors.get(&o.name).cloned()))
                .collect()
        };

        for (obligation, executor) in snapshot {
            let ctx = ObligationContext {
                session,
                phase: obligation.phase,
                audit: self.audit.as_ref(),
            };

            let outcome = match executor {
                Some(executor) => executor(&obligation.expr, &ctx),
                None => Err(UconError::evaluation(format!(
                    "unknown obligation name '{}'",
                    obligation.name
                ))),
            };

            if let Err(source) = outcome {
                return Err(UconError::ObligationFailed {
                    obligation_id: obligation.id,
                    phase: obligation.phase.to_string(),
                    source: Box::new(source),
                });
            }

            debug!(
                session_id = %session.id(),
                obligation_id = %obligation.id,
                phase = %obligation.phase,
                "Obligation fulfilled"
            );
        }

        Ok(())
    }
}

/// Split a `"key:value"` expression, trimming both halves
fn parse_key_value(expr: &str) -> Result<(&str, &str)> {
    let mut parts = expr.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) if !key.trim().is_empty() => {
            Ok((key.trim(), value.trim()))
        }
        _ => Err(UconError::evaluation(format!(
            "invalid expression format: {expr}, expected 'key:value'"
        ))),
    }
}

/// Textual form of a scalar attribute, used for equality checks
fn attribute_text(value: &AttributeValue) -> Option<String> {
    match value {
        AttributeValue::String(s) => Some(s.clone()),
        AttributeValue::Bool(b) => Some(b.to_string()),
        AttributeValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The attribute named by `key` must equal `value`
fn execute_user_authentication(expr: &str, ctx: &ObligationContext<'_>) -> Result<()> {
    let (key, expected) = parse_key_value(expr)?;
    let actual = ctx.session.attribute(key).as_ref().and_then(attribute_text);

    if actual.as_deref() != Some(expected) {
        return Err(UconError::unsatisfied(format!(
            "user {} authentication failed: {expr} (expected: {expected}, actual: {})",
            ctx.session.subject(),
            actual.as_deref().unwrap_or("<missing>")
        )));
    }

    info!(
        session_id = %ctx.session.id(),
        subject = %ctx.session.subject(),
        check = %expr,
        "Authentication verified"
    );
    Ok(())
}

/// Record who accessed what, both as a log line and an audit entry
fn execute_access_logging(expr: &str, ctx: &ObligationContext<'_>) -> Result<()> {
    let session = ctx.session;
    info!(
        session_id = %session.id(),
        subject = %session.subject(),
        action = %session.action(),
        object = %session.object(),
        phase = %ctx.phase,
        detail = %expr,
        "Access logged"
    );

    ctx.audit.append_audit(AuditEvent::new(AuditEventType::AccessLogged {
        session_id: session.id().clone(),
        subject: session.subject().to_string(),
        action: session.action().to_string(),
        object: session.object().to_string(),
        detail: expr.to_string(),
        phase: ctx.phase,
    }))
}

/// The subject must hold an unexpired VIP status
fn execute_vip_validation(_expr: &str, ctx: &ObligationContext<'_>) -> Result<()> {
    let session = ctx.session;
    let level = session
        .attribute("vip_level")
        .as_ref()
        .and_then(attribute_text)
        .filter(|level| !level.is_empty())
        .ok_or_else(|| {
            UconError::unsatisfied(format!("user {} is not a VIP user", session.subject()))
        })?;

    if session.attribute("vip_expiry").as_ref().and_then(attribute_text).as_deref()
        == Some("expired")
    {
        return Err(UconError::unsatisfied(format!(
            "user {} VIP membership has expired",
            session.subject()
        )));
    }

    debug!(session_id = %session.id(), level = %level, "VIP status valid");
    Ok(())
}

/// Write `value` into the attribute `key`
fn execute_set_attribute(expr: &str, ctx: &ObligationContext<'_>) -> Result<()> {
    let (key, value) = parse_key_value(expr)?;
    ctx.session.update_attribute(key, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use ucon_api::Attributes;
    use ucon_store::{MemoryAuditLog, SessionStore};

    struct Fixture {
        audit: Arc<MemoryAuditLog>,
        registry: ObligationRegistry,
        _store: SessionStore,
        session: Arc<Session>,
    }

    fn fixture(pairs: &[(&str, AttributeValue)]) -> Fixture {
        let audit = Arc::new(MemoryAuditLog::new(64));
        let registry = ObligationRegistry::new(audit.clone());
        let store = SessionStore::new();
        let attributes: Attributes = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let id = store
            .create_session("alice", "read", "document1", attributes)
            .unwrap();
        let session = store.get_session(&id).unwrap();
        Fixture {
            audit,
            registry,
            _store: store,
            session,
        }
    }

    #[test]
    fn test_user_authentication_passes() {
        let f = fixture(&[("authenticated", json!("true"))]);
        f.registry
            .add(Obligation::new(
                "pre_auth",
                "user_authentication",
                ObligationPhase::Pre,
                "authenticated:true",
            ))
            .unwrap();

        f.registry.execute_all(&f.session).unwrap();
        f.registry.execute_phase(&f.session, ObligationPhase::Pre).unwrap();
    }

    #[test]
    fn test_user_authentication_accepts_bool_attribute() {
        let f = fixture(&[("authenticated", json!(true))]);
        f.registry
            .add(Obligation::new(
                "pre_auth",
                "user_authentication",
                ObligationPhase::Pre,
                "authenticated : true",
            ))
            .unwrap();

        f.registry.execute_phase(&f.session, ObligationPhase::Pre).unwrap();
    }

    #[test]
    fn test_user_authentication_mismatch_reports_obligation() {
        let f = fixture(&[("authenticated", json!("false"))]);
        f.registry
            .add(Obligation::new(
                "pre_auth",
                "user_authentication",
                ObligationPhase::Pre,
                "authenticated:true",
            ))
            .unwrap();

        let err = f
            .registry
            .execute_phase(&f.session, ObligationPhase::Pre)
            .unwrap_err();
        match err {
            UconError::ObligationFailed {
                obligation_id,
                phase,
                source,
            } => {
                assert_eq!(obligation_id, ObligationId::new("pre_auth"));
                assert_eq!(phase, "pre");
                assert!(matches!(*source, UconError::Unsatisfied(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_expression() {
        let f = fixture(&[]);
        f.registry
            .add(Obligation::new("bad", "user_authentication", ObligationPhase::Pre, "a:b:c"))
            .unwrap();

        let err = f.registry.execute_all(&f.session).unwrap_err();
        assert!(err.to_string().contains("expected 'key:value'"));
    }

    #[test]
    fn test_phase_filter() {
        let f = fixture(&[]);
        f.registry
            .add(Obligation::new("post_log", "access_logging", ObligationPhase::Post, "closing"))
            .unwrap();
        f.registry
            .add(Obligation::new(
                "pre_auth",
                "user_authentication",
                ObligationPhase::Pre,
                "authenticated:true",
            ))
            .unwrap();

        // Only the post obligation runs; the failing pre one is skipped
        f.registry.execute_phase(&f.session, ObligationPhase::Post).unwrap();
        f.registry.execute_phase(&f.session, ObligationPhase::Ongoing).unwrap();

        let audits = f.audit.recent_audits(10).unwrap();
        assert_eq!(audits.len(), 1);
        match &audits[0].event {
            AuditEventType::AccessLogged { phase, detail, .. } => {
                assert_eq!(*phase, ObligationPhase::Post);
                assert_eq!(detail, "closing");
            }
            other => panic!("unexpected audit event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_name_fails() {
        let f = fixture(&[]);
        f.registry
            .add(Obligation::new("mystery", "send_fax", ObligationPhase::Ongoing, ""))
            .unwrap();

        let err = f
            .registry
            .execute_phase(&f.session, ObligationPhase::Ongoing)
            .unwrap_err();
        match err {
            UconError::ObligationFailed { source, .. } => {
                assert!(matches!(*source, UconError::Evaluation(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_vip_validation() {
        let f = fixture(&[("vip_level", json!("gold"))]);
        f.registry
            .add(Obligation::new("vip", "vip_validation", ObligationPhase::Ongoing, ""))
            .unwrap();
        f.registry.execute_all(&f.session).unwrap();

        f.session.update_attribute("vip_expiry", "expired");
        assert!(f.registry.execute_all(&f.session).is_err());

        let f = fixture(&[]);
        f.registry
            .add(Obligation::new("vip", "vip_validation", ObligationPhase::Ongoing, ""))
            .unwrap();
        assert!(f.registry.execute_all(&f.session).is_err());
    }

    #[test]
    fn test_set_attribute_writes_through_session() {
        let f = fixture(&[]);
        f.registry
            .add(Obligation::new("mark", "set_attribute", ObligationPhase::Pre, "audited:yes"))
            .unwrap();

        f.registry.execute_phase(&f.session, ObligationPhase::Pre).unwrap();
        assert_eq!(f.session.attribute("audited"), Some(json!("yes")));
    }

    #[test]
    fn test_custom_executor_and_remove() {
        let f = fixture(&[]);
        f.registry.register_executor("always_fail", |_, _| Err(UconError::unsatisfied("nope")));
        f.registry
            .add(Obligation::new("x", "always_fail", ObligationPhase::Post, ""))
            .unwrap();
        assert!(f.registry.execute_all(&f.session).is_err());

        f.registry.remove(&ObligationId::new("x")).unwrap();
        f.registry.execute_all(&f.session).unwrap();
        assert!(matches!(
            f.registry.remove(&ObligationId::new("x")),
            Err(UconError::ObligationNotFound(_))
        ));
    }
}
