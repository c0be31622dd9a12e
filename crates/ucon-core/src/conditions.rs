//! Condition registry and evaluation

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};
use ucon_api::{AttributeValue, Condition, ConditionKind};
use ucon_store::Session;
use ucon_util::{ConditionId, Result, UconError};

/// Evaluator for one condition name: `(expr, session) -> satisfied`.
///
/// `Ok(false)` is a legitimate failed predicate; `Err` is reserved for
/// evaluation faults (missing attribute, wrong type, malformed expr).
pub type ConditionEvaluator = Arc<dyn Fn(&str, &Session) -> Result<bool> + Send + Sync>;

/// Registry of global conditions plus the evaluator dispatch table
pub struct ConditionRegistry {
    conditions: RwLock<HashMap<ConditionId, Condition>>,
    evaluators: RwLock<HashMap<String, ConditionEvaluator>>,
}

impl ConditionRegistry {
    /// Create a registry with the built-in evaluators (`location`, `vip_level`)
    pub fn new() -> Self {
        let registry = Self {
            conditions: RwLock::new(HashMap::new()),
            evaluators: RwLock::new(HashMap::new()),
        };
        registry.register_evaluator("location", check_location);
        registry.register_evaluator("vip_level", check_vip_level);
        registry
    }

    /// Register (or replace) the evaluator for a condition name
    pub fn register_evaluator<F>(&self, name: impl Into<String>, evaluator: F)
    where
        F: Fn(&str, &Session) -> Result<bool> + Send + Sync + 'static,
    {
        self.evaluators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(evaluator));
    }

    /// Add a condition; a condition with the same ID is replaced
    pub fn add(&self, condition: Condition) -> Result<()> {
        condition.validate()?;

        info!(
            condition_id = %condition.id,
            name = %condition.name,
            kind = %condition.kind,
            "Condition registered"
        );

        self.conditions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(condition.id.clone(), condition);
        Ok(())
    }

    pub fn remove(&self, id: &ConditionId) -> Result<Condition> {
        self.conditions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or_else(|| UconError::ConditionNotFound(id.clone()))
    }

    /// Every registered condition
    pub fn list(&self) -> Vec<Condition> {
        self.conditions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.conditions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check every registered condition against the session
    pub fn evaluate(&self, session: &Session) -> Result<bool> {
        self.evaluate_matching(session, None)
    }

    /// Check only the conditions of one kind
    pub fn evaluate_kind(&self, session: &Session, kind: ConditionKind) -> Result<bool> {
        self.evaluate_matching(session, Some(kind))
    }

    fn evaluate_matching(&self, session: &Session, kind: Option<ConditionKind>) -> Result<bool> {
        // Snapshot the definitions so no registry lock is held while the
        // session lock is taken.
        let snapshot: Vec<(Condition, Option<ConditionEvaluator>)> = {
            let conditions = self.conditions.read().unwrap_or_else(PoisonError::into_inner);
            let evaluators = self.evaluators.read().unwrap_or_else(PoisonError::into_inner);
            conditions
                .values()
                .filter(|c| kind.is_none_or(|k| c.kind == k))
                .map(|c| (c.clone(), evaluators.get(&c.name).cloned()))
                .collect()
        };

        for (condition, evaluator) in snapshot {
            let evaluator = evaluator.ok_or_else(|| {
                UconError::evaluation(format!(
                    "unknown condition name '{}' (condition {})",
                    condition.name, condition.id
                ))
            })?;

            let satisfied = evaluator(&condition.expr, session)?;
            debug!(
                session_id = %session.id(),
                condition_id = %condition.id,
                satisfied,
                "Condition evaluated"
            );

            if !satisfied {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

impl Default for ConditionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The `location` attribute must equal `expr`
fn check_location(expr: &str, session: &Session) -> Result<bool> {
    match session.attribute("location") {
        Some(AttributeValue::String(location)) => Ok(location == expr),
        _ => Err(UconError::evaluation("location attribute not found or not a string")),
    }
}

/// The `vip_level` attribute must be an integer no lower than `expr`
fn check_vip_level(expr: &str, session: &Session) -> Result<bool> {
    let level = session
        .attribute("vip_level")
        .as_ref()
        .and_then(integer_value)
        .ok_or_else(|| UconError::evaluation("vip_level attribute not found or not an integer"))?;

    let required: i64 = expr
        .trim()
        .parse()
        .map_err(|e| UconError::evaluation(format!("invalid vip_level expression '{expr}': {e}")))?;

    Ok(level >= required)
}

/// Integer view of a JSON number; integral floats are accepted
fn integer_value(value: &AttributeValue) -> Option<i64> {
    let number = value.as_number()?;
    number.as_i64().or_else(|| {
        number
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use ucon_api::Attributes;
    use ucon_store::SessionStore;

    fn session_with(pairs: &[(&str, AttributeValue)]) -> (SessionStore, Arc<Session>) {
        let store = SessionStore::new();
        let attributes: Attributes = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let id = store
            .create_session("alice", "read", "document1", attributes)
            .unwrap();
        let session = store.get_session(&id).unwrap();
        (store, session)
    }

    #[test]
    fn test_no_conditions_is_vacuously_true() {
        let registry = ConditionRegistry::new();
        let (_store, session) = session_with(&[]);
        assert!(registry.evaluate(&session).unwrap());
    }

    #[test]
    fn test_location_follows_attribute_updates() {
        let registry = ConditionRegistry::new();
        registry
            .add(Condition::new("office_only", "location", ConditionKind::One, "office"))
            .unwrap();
        let (_store, session) = session_with(&[("location", json!("office"))]);

        assert!(registry.evaluate(&session).unwrap());

        session.update_attribute("location", "home");
        assert!(!registry.evaluate(&session).unwrap());
    }

    #[test]
    fn test_location_wrong_type_is_error() {
        let registry = ConditionRegistry::new();
        registry
            .add(Condition::new("office_only", "location", ConditionKind::One, "office"))
            .unwrap();
        let (_store, session) = session_with(&[("location", json!(42))]);

        assert!(matches!(
            registry.evaluate(&session),
            Err(UconError::Evaluation(_))
        ));
    }

    #[test]
    fn test_vip_level() {
        let registry = ConditionRegistry::new();
        registry
            .add(Condition::new("vip", "vip_level", ConditionKind::Always, "2"))
            .unwrap();

        let (_store, session) = session_with(&[("vip_level", json!(3))]);
        assert!(registry.evaluate(&session).unwrap());

        session.update_attribute("vip_level", 1);
        assert!(!registry.evaluate(&session).unwrap());

        session.update_attribute("vip_level", 2.0);
        assert!(registry.evaluate(&session).unwrap());

        session.update_attribute("vip_level", "gold");
        assert!(matches!(
            registry.evaluate(&session),
            Err(UconError::Evaluation(_))
        ));
    }

    #[test]
    fn test_vip_level_malformed_expr() {
        let registry = ConditionRegistry::new();
        registry
            .add(Condition::new("vip", "vip_level", ConditionKind::Always, "high"))
            .unwrap();
        let (_store, session) = session_with(&[("vip_level", json!(3))]);

        let err = registry.evaluate(&session).unwrap_err();
        assert!(err.to_string().contains("invalid vip_level expression"));
    }

    #[test]
    fn test_unknown_name_is_error() {
        let registry = ConditionRegistry::new();
        registry
            .add(Condition::new("c", "moon_phase", ConditionKind::One, "full"))
            .unwrap();
        let (_store, session) = session_with(&[]);

        assert!(matches!(
            registry.evaluate(&session),
            Err(UconError::Evaluation(_))
        ));
    }

    #[test]
    fn test_add_overwrites_by_id_and_remove() {
        let registry = ConditionRegistry::new();
        registry
            .add(Condition::new("loc", "location", ConditionKind::One, "office"))
            .unwrap();
        registry
            .add(Condition::new("loc", "location", ConditionKind::One, "home"))
            .unwrap();
        assert_eq!(registry.len(), 1);

        let (_store, session) = session_with(&[("location", json!("home"))]);
        assert!(registry.evaluate(&session).unwrap());

        registry.remove(&ConditionId::new("loc")).unwrap();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.remove(&ConditionId::new("loc")),
            Err(UconError::ConditionNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_definition_rejected() {
        let registry = ConditionRegistry::new();
        let result = registry.add(Condition::new("", "location", ConditionKind::One, "x"));
        assert!(matches!(result, Err(UconError::InvalidArgument(_))));
    }

    #[test]
    fn test_kind_filter() {
        let registry = ConditionRegistry::new();
        registry
            .add(Condition::new("entry", "location", ConditionKind::One, "office"))
            .unwrap();
        registry
            .add(Condition::new("vip", "vip_level", ConditionKind::Always, "5"))
            .unwrap();
        let (_store, session) =
            session_with(&[("location", json!("office")), ("vip_level", json!(1))]);

        assert!(registry.evaluate_kind(&session, ConditionKind::One).unwrap());
        assert!(!registry.evaluate_kind(&session, ConditionKind::Always).unwrap());
        assert!(!registry.evaluate(&session).unwrap());
    }

    #[test]
    fn test_custom_evaluator() {
        let registry = ConditionRegistry::new();
        registry.register_evaluator("department", |expr, session| {
            Ok(session.attribute("department") == Some(json!(expr)))
        });
        registry
            .add(Condition::new("eng", "department", ConditionKind::Always, "engineering"))
            .unwrap();

        let (_store, session) = session_with(&[("department", json!("engineering"))]);
        assert!(registry.evaluate(&session).unwrap());
    }

    #[test]
    fn test_evaluator_may_update_session() {
        let registry = ConditionRegistry::new();
        registry.register_evaluator("visits", |expr, session| {
            let visits = session
                .attribute("visits")
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            // Writing while the read value is still in scope must not block
            session.update_attribute("visits", visits + 1);
            Ok(visits < expr.parse::<i64>().unwrap_or(0))
        });
        registry
            .add(Condition::new("cap", "visits", ConditionKind::Always, "2"))
            .unwrap();

        let (_store, session) = session_with(&[("visits", json!(0))]);
        assert!(registry.evaluate(&session).unwrap());
        assert!(registry.evaluate(&session).unwrap());
        assert!(!registry.evaluate(&session).unwrap());
        assert_eq!(session.attribute("visits"), Some(json!(3)));
    }
}
