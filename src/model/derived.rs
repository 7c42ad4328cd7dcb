//! Derived components: a store key computed from other store keys.

use std::sync::Arc;

use super::error::ModelError;
use super::gate::GateId;
use super::store::Model;
use super::value::ModelValue;

/// A component whose value is a pure function of other components.
///
/// The derived key exists exactly while every dependency exists and the
/// compute function returns `Some`. It is recomputed whenever a dependency
/// is replaced and removed as soon as one vanishes.
///
/// Derived components may depend on other derived components; cycles between
/// them are not detected beyond the store's cascade limit.
#[derive(Debug)]
pub struct DerivedComponent {
    model: Model,
    key: String,
    gate: GateId,
}

impl DerivedComponent {
    pub fn register<I, K, F>(
        model: &Model,
        key: impl Into<String>,
        deps: I,
        compute: F,
    ) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
        F: Fn(&[ModelValue]) -> Option<ModelValue> + Send + Sync + 'static,
    {
        let key = key.into();
        let deps: Vec<String> = deps.into_iter().map(Into::into).collect();
        if deps.iter().any(|d| *d == key) {
            log::warn!("[Derived] '{}' lists itself as a dependency", key);
            return Err(ModelError::SelfReferencingDerived(key));
        }

        let compute = Arc::new(compute);
        let on_present = {
            let weak = model.downgrade();
            let key = key.clone();
            move |values: &[ModelValue]| {
                let Some(model) = weak.upgrade() else { return };
                match compute(values) {
                    Some(value) => model.add(key.clone(), value),
                    None => model.remove(&key),
                }
            }
        };
        let on_removed = {
            let weak = model.downgrade();
            let key = key.clone();
            move || {
                if let Some(model) = weak.upgrade() {
                    model.remove(&key);
                }
            }
        };

        let gate = model.register_gate_with_teardown(deps, on_present, on_removed)?;
        log::debug!("[Derived] '{}' registered as {}", key, gate);
        Ok(Self {
            model: model.clone(),
            key,
            gate,
        })
    }

    /// The store key this component publishes under.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn gate(&self) -> GateId {
        self.gate
    }

    /// Stop deriving and remove the derived key.
    pub fn unregister(self) -> Result<(), ModelError> {
        self.model.unregister_gate(self.gate)?;
        self.model.remove(&self.key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
