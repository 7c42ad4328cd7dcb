//! Dependency gates: callbacks that only run while a set of keys exists.
//!
//! A gate watches a fixed, ordered list of component keys. It is *active*
//! exactly when every key is present in the store:
//!
//! - inactive → active: `on_all_present` runs once with the current values
//!   in declared order.
//! - active → inactive: `on_any_removed` (if any) runs once, with no values.
//! - active, and one of its keys changes value: depends on the store's
//!   [`ReplacePolicy`](crate::config::ReplacePolicy). `RemoveThenAdd` runs
//!   the teardown and then `on_all_present` again; `Recompute` only re-runs
//!   `on_all_present`.
//!
//! When one mutation affects several gates they are visited in registration
//! order. Callbacks run without any store lock held; a panicking callback is
//! logged and the remaining gates are still evaluated.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use super::error::ModelError;
use super::event::ChangeKind;
use super::store::{run_guarded, Model, Mutation};
use super::value::ModelValue;

/// Activation callback: receives the values of the gate's keys in order.
pub type GateCallback = Arc<dyn Fn(&[ModelValue]) + Send + Sync>;

/// Deactivation callback.
pub type TeardownCallback = Arc<dyn Fn() + Send + Sync>;

/// Opaque handle identifying a registered gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GateId(pub(crate) u64);

impl fmt::Display for GateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gate-{}", self.0)
    }
}

pub(crate) struct GateEntry {
    pub(crate) id: GateId,
    pub(crate) keys: Vec<String>,
    on_all_present: GateCallback,
    on_any_removed: Option<TeardownCallback>,
    active: bool,
}

enum Transition {
    Activate(GateCallback, Vec<ModelValue>),
    Recompute(GateCallback, Vec<ModelValue>),
    Deactivate(Option<TeardownCallback>),
}

fn collect_keys<I, K>(keys: I) -> Result<Vec<String>, ModelError>
where
    I: IntoIterator<Item = K>,
    K: Into<String>,
{
    let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
    let mut seen = HashSet::with_capacity(keys.len());
    for key in &keys {
        if !seen.insert(key.as_str()) {
            return Err(ModelError::DuplicateDependency(key.clone()));
        }
    }
    Ok(keys)
}

impl Model {
    /// Register a gate without a teardown callback.
    ///
    /// If every key is already present the gate activates before this call
    /// returns.
    pub fn register_gate<I, K, F>(&self, keys: I, on_all_present: F) -> Result<GateId, ModelError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
        F: Fn(&[ModelValue]) + Send + Sync + 'static,
    {
        let keys = collect_keys(keys)?;
        Ok(self.insert_gate(keys, Arc::new(on_all_present), None))
    }

    /// Register a gate with both an activation and a teardown callback.
    pub fn register_gate_with_teardown<I, K, F, T>(
        &self,
        keys: I,
        on_all_present: F,
        on_any_removed: T,
    ) -> Result<GateId, ModelError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
        F: Fn(&[ModelValue]) + Send + Sync + 'static,
        T: Fn() + Send + Sync + 'static,
    {
        let keys = collect_keys(keys)?;
        Ok(self.insert_gate(keys, Arc::new(on_all_present), Some(Arc::new(on_any_removed))))
    }

    fn insert_gate(
        &self,
        keys: Vec<String>,
        on_all_present: GateCallback,
        on_any_removed: Option<TeardownCallback>,
    ) -> GateId {
        let id = GateId(self.next_id());
        log::debug!("[Model] register {} on {:?}", id, keys);
        self.inner.gates.lock().push(GateEntry {
            id,
            keys,
            on_all_present,
            on_any_removed,
            active: false,
        });
        self.submit(Mutation::EvaluateGate(id));
        id
    }

    /// Unregister a gate, running its teardown if it was active.
    ///
    /// A second call for the same id reports [`ModelError::UnknownGate`] and
    /// changes nothing.
    pub fn unregister_gate(&self, id: GateId) -> Result<(), ModelError> {
        let removed = {
            let mut gates = self.inner.gates.lock();
            gates
                .iter()
                .position(|g| g.id == id)
                .map(|pos| gates.remove(pos))
        };
        let entry = match removed {
            Some(entry) => entry,
            None => {
                log::warn!("[Model] unregister called for unknown {}", id);
                return Err(ModelError::UnknownGate(id));
            }
        };
        log::debug!("[Model] unregister {} (active: {})", id, entry.active);
        if entry.active {
            if let Some(teardown) = entry.on_any_removed {
                self.submit(Mutation::Teardown { gate: id, teardown });
            }
        }
        Ok(())
    }

    /// Unregister every gate in registration order.
    pub fn clear_gates(&self) {
        let ids: Vec<GateId> = self.inner.gates.lock().iter().map(|g| g.id).collect();
        for id in ids {
            // Already gone if an earlier teardown unregistered it.
            let _ = self.unregister_gate(id);
        }
    }

    /// Whether a gate is active; `None` if it is not registered.
    pub fn is_gate_active(&self, id: GateId) -> Option<bool> {
        self.inner
            .gates
            .lock()
            .iter()
            .find(|g| g.id == id)
            .map(|g| g.active)
    }

    /// Dependency keys of a registered gate.
    pub fn gate_keys(&self, id: GateId) -> Option<Vec<String>> {
        self.inner
            .gates
            .lock()
            .iter()
            .find(|g| g.id == id)
            .map(|g| g.keys.clone())
    }

    /// Number of registered gates.
    pub fn gate_count(&self) -> usize {
        self.inner.gates.lock().len()
    }

    /// Re-evaluate every gate that depends on `key`, in registration order.
    ///
    /// `masked` is treated as absent regardless of the store contents.
    pub(crate) fn evaluate_gates(&self, key: &str, kind: ChangeKind, masked: Option<&str>) {
        let ids: Vec<GateId> = self
            .inner
            .gates
            .lock()
            .iter()
            .filter(|g| g.keys.iter().any(|k| k == key))
            .map(|g| g.id)
            .collect();
        for id in ids {
            self.evaluate_gate(id, kind, masked);
        }
    }

    pub(crate) fn evaluate_gate(&self, id: GateId, kind: ChangeKind, masked: Option<&str>) {
        let transition = {
            let mut gates = self.inner.gates.lock();
            let gate = match gates.iter_mut().find(|g| g.id == id) {
                Some(gate) => gate,
                // Unregistered by an earlier callback in this cascade.
                None => return,
            };
            let values: Option<Vec<ModelValue>> = {
                let components = self.inner.components.lock();
                gate.keys
                    .iter()
                    .map(|k| {
                        if masked == Some(k.as_str()) {
                            None
                        } else {
                            components.get(k).cloned()
                        }
                    })
                    .collect()
            };
            match (values, gate.active) {
                (Some(values), false) => {
                    gate.active = true;
                    Some(Transition::Activate(gate.on_all_present.clone(), values))
                }
                (Some(values), true) if kind == ChangeKind::Changed => {
                    Some(Transition::Recompute(gate.on_all_present.clone(), values))
                }
                (None, true) => {
                    gate.active = false;
                    Some(Transition::Deactivate(gate.on_any_removed.clone()))
                }
                _ => None,
            }
        };

        match transition {
            Some(Transition::Activate(callback, values)) => {
                log::debug!("[Model] {} activated", id);
                run_guarded("gate activation", || callback(&values));
            }
            Some(Transition::Recompute(callback, values)) => {
                log::debug!("[Model] {} recomputed", id);
                run_guarded("gate activation", || callback(&values));
            }
            Some(Transition::Deactivate(teardown)) => {
                log::debug!("[Model] {} deactivated", id);
                if let Some(teardown) = teardown {
                    run_guarded("gate teardown", || teardown());
                }
            }
            None => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelConfig, ReplacePolicy};
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Present(Vec<ModelValue>),
        Removed,
    }

    type CallLog = Arc<Mutex<Vec<Call>>>;

    fn register_logged(model: &Model, keys: &[&str]) -> (GateId, CallLog) {
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let on_present = log.clone();
        let on_removed = log.clone();
        let id = model
            .register_gate_with_teardown(
                keys.iter().copied(),
                move |values| on_present.lock().push(Call::Present(values.to_vec())),
                move || on_removed.lock().push(Call::Removed),
            )
            .unwrap();
        (id, log)
    }

    fn scalars(values: &[f64]) -> Call {
        Call::Present(values.iter().copied().map(ModelValue::Scalar).collect())
    }

    #[test]
    fn test_gate_scenario_remove_then_add_policy() {
        let model = Model::new();
        let (id, log) = register_logged(&model, &["x", "y"]);

        model.add("x", 1);
        assert!(log.lock().is_empty());
        assert_eq!(model.is_gate_active(id), Some(false));

        model.add("y", 2);
        assert_eq!(*log.lock(), vec![scalars(&[1.0, 2.0])]);
        assert_eq!(model.is_gate_active(id), Some(true));

        model.remove("x");
        assert_eq!(log.lock().last(), Some(&Call::Removed));
        assert_eq!(model.is_gate_active(id), Some(false));

        model.add("x", 3);
        assert_eq!(log.lock().last(), Some(&scalars(&[3.0, 2.0])));

        model.add("y", 5);
        let calls = log.lock().clone();
        assert_eq!(
            calls,
            vec![
                scalars(&[1.0, 2.0]),
                Call::Removed,
                scalars(&[3.0, 2.0]),
                Call::Removed,
                scalars(&[3.0, 5.0]),
            ]
        );
    }

    #[test]
    fn test_gate_scenario_recompute_policy() {
        let model = Model::with_config(ModelConfig {
            replace_policy: ReplacePolicy::Recompute,
            ..ModelConfig::default()
        });
        let (_, log) = register_logged(&model, &["x", "y"]);

        model.add("x", 1);
        model.add("y", 2);
        model.remove("x");
        model.add("x", 3);
        model.add("y", 5);

        assert_eq!(
            *log.lock(),
            vec![
                scalars(&[1.0, 2.0]),
                Call::Removed,
                scalars(&[3.0, 2.0]),
                scalars(&[3.0, 5.0]),
            ]
        );
    }

    #[test]
    fn test_register_when_already_present_activates_immediately() {
        let model = Model::new();
        model.add("a", "alpha");
        model.add("b", true);

        let (id, log) = register_logged(&model, &["a", "b"]);
        assert_eq!(model.is_gate_active(id), Some(true));
        assert_eq!(
            *log.lock(),
            vec![Call::Present(vec![
                ModelValue::Text("alpha".into()),
                ModelValue::Bool(true)
            ])]
        );
    }

    #[test]
    fn test_unregister_active_gate_tears_down_once() {
        let model = Model::new();
        model.add("a", 1);
        let (id, log) = register_logged(&model, &["a"]);

        assert!(model.unregister_gate(id).is_ok());
        assert_eq!(model.unregister_gate(id), Err(ModelError::UnknownGate(id)));

        let removed = log.lock().iter().filter(|c| **c == Call::Removed).count();
        assert_eq!(removed, 1);
        assert_eq!(model.is_gate_active(id), None);

        // No further callbacks once unregistered.
        model.add("a", 2);
        model.remove("a");
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_unregister_inactive_gate_has_no_teardown() {
        let model = Model::new();
        let (id, log) = register_logged(&model, &["missing"]);
        model.unregister_gate(id).unwrap();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_duplicate_dependency_rejected() {
        let model = Model::new();
        let err = model.register_gate(["a", "b", "a"], |_| {}).unwrap_err();
        assert_eq!(err, ModelError::DuplicateDependency("a".into()));
        assert_eq!(model.gate_count(), 0);
    }

    #[test]
    fn test_empty_dependency_list_activates() {
        let model = Model::new();
        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();
        let id = model
            .register_gate(Vec::<String>::new(), move |_| *h.lock() += 1)
            .unwrap();
        assert_eq!(model.is_gate_active(id), Some(true));
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn test_activation_order_follows_registration() {
        let model = Model::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let order_on = order.clone();
            let order_off = order.clone();
            model
                .register_gate_with_teardown(
                    ["shared"],
                    move |_| order_on.lock().push(format!("{name}+")),
                    move || order_off.lock().push(format!("{name}-")),
                )
                .unwrap();
        }

        model.add("shared", 1);
        model.remove("shared");

        assert_eq!(
            *order.lock(),
            vec!["first+", "second+", "third+", "first-", "second-", "third-"]
        );
    }

    #[test]
    fn test_panicking_gate_does_not_block_others() {
        let model = Model::new();
        model.register_gate(["k"], |_| panic!("broken effect")).unwrap();
        let (id, log) = register_logged(&model, &["k"]);

        model.add("k", 1);
        assert_eq!(model.is_gate_active(id), Some(true));
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_reentrant_mutation_is_deferred_until_callback_returns() {
        let model = Model::new();
        let weak = model.downgrade();
        let seen_inside = Arc::new(Mutex::new(None));
        let seen = seen_inside.clone();

        model
            .register_gate(["trigger"], move |values| {
                if let Some(m) = weak.upgrade() {
                    m.add("echo", values[0].clone());
                    // Queued: not yet applied while this callback runs.
                    *seen.lock() = Some(m.has("echo"));
                }
            })
            .unwrap();

        model.add("trigger", 9);
        assert_eq!(*seen_inside.lock(), Some(false));
        // Applied before the outer add returned.
        assert_eq!(model.get("echo"), Some(ModelValue::Scalar(9.0)));
    }

    #[test]
    fn test_chained_gates_settle_in_one_call() {
        let model = Model::new();
        let weak = model.downgrade();
        model
            .register_gate(["a"], move |values| {
                if let Some(m) = weak.upgrade() {
                    m.add("b", values[0].as_scalar().unwrap_or(0.0) * 2.0);
                }
            })
            .unwrap();
        let (id, log) = register_logged(&model, &["a", "b"]);

        model.add("a", 4);
        assert_eq!(model.is_gate_active(id), Some(true));
        assert_eq!(*log.lock(), vec![scalars(&[4.0, 8.0])]);
    }

    #[test]
    fn test_unregister_from_inside_callback() {
        let model = Model::new();
        let weak = model.downgrade();
        let slot: Arc<Mutex<Option<GateId>>> = Arc::new(Mutex::new(None));
        let slot_in = slot.clone();
        let hits = Arc::new(Mutex::new(0));
        let hits_in = hits.clone();

        let id = model
            .register_gate(["once"], move |_| {
                *hits_in.lock() += 1;
                if let (Some(m), Some(id)) = (weak.upgrade(), *slot_in.lock()) {
                    let _ = m.unregister_gate(id);
                }
            })
            .unwrap();
        *slot.lock() = Some(id);

        model.add("once", 1);
        model.add("once", 2);
        assert_eq!(*hits.lock(), 1);
        assert_eq!(model.gate_count(), 0);
    }

    #[test]
    fn test_invariant_holds_across_interleavings() {
        let model = Model::new();
        let (id, _) = register_logged(&model, &["p", "q", "r"]);
        let ops: [(&str, bool); 10] = [
            ("p", true),
            ("q", true),
            ("p", false),
            ("r", true),
            ("p", true),
            ("q", true),
            ("r", false),
            ("r", true),
            ("q", false),
            ("q", true),
        ];
        for (key, add) in ops {
            if add {
                model.add(key, 1);
            } else {
                model.remove(key);
            }
            let all = ["p", "q", "r"].iter().all(|k| model.has(k));
            assert_eq!(model.is_gate_active(id), Some(all));
        }
    }

    #[test]
    fn test_soft_reference_lookup_inside_callback() {
        let model = Model::new();
        let weak = model.downgrade();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = seen.clone();
        model
            .register_gate(["hard"], move |_| {
                let soft = weak.upgrade().and_then(|m| m.get("soft"));
                seen_in.lock().push(soft);
            })
            .unwrap();

        model.add("hard", 1);
        model.remove("hard");
        model.add("soft", 2);
        model.add("hard", 1);

        assert_eq!(*seen.lock(), vec![None, Some(ModelValue::Scalar(2.0))]);
    }

    #[test]
    fn test_clear_gates_runs_teardowns_in_order() {
        let model = Model::new();
        model.add("k", 1);
        let (_, first) = register_logged(&model, &["k"]);
        let (_, second) = register_logged(&model, &["k"]);

        model.clear_gates();
        assert_eq!(model.gate_count(), 0);
        assert_eq!(first.lock().last(), Some(&Call::Removed));
        assert_eq!(second.lock().last(), Some(&Call::Removed));
    }
}
