//! Array components: an ordered list of records assembled from store keys.
//!
//! Each tracked item is backed by a gate over its field sources. While the
//! gate is active the item is part of the published list; when any source
//! vanishes the item is dropped and its position remembered so that it
//! returns to the same slot once the sources reappear.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::ModelError;
use super::gate::GateId;
use super::store::{Model, WeakModel};
use super::value::ModelValue;

#[derive(Default)]
struct ArrayState {
    /// Present items, in list order.
    items: Vec<(String, ModelValue)>,
    /// Last position of items that have been dropped.
    prior_index: HashMap<String, usize>,
    gates: HashMap<String, GateId>,
}

/// A store key holding a [`ModelValue::List`] of item records.
pub struct ArrayComponent {
    model: Model,
    key: String,
    sentinels: bool,
    state: Arc<Mutex<ArrayState>>,
}

impl ArrayComponent {
    /// Publish an empty list under `key`.
    pub fn new(model: &Model, key: impl Into<String>) -> Self {
        let key = key.into();
        model.add(key.clone(), ModelValue::List(Vec::new()));
        Self {
            model: model.clone(),
            key,
            sentinels: false,
            state: Arc::new(Mutex::new(ArrayState::default())),
        }
    }

    /// Also publish each inserted item under `{key}AddedItem` and each
    /// dropped item under `{key}RemovedItem`.
    pub fn with_sentinels(mut self) -> Self {
        self.sentinels = true;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn added_item_key(&self) -> String {
        format!("{}AddedItem", self.key)
    }

    pub fn removed_item_key(&self) -> String {
        format!("{}RemovedItem", self.key)
    }

    /// Track an item built from `(field, source_key)` pairs.
    ///
    /// Several fields may read the same source key; the gate depends on each
    /// distinct key once.
    pub fn track_item<I, F, S>(&self, item_name: impl Into<String>, fields: I) -> Result<(), ModelError>
    where
        I: IntoIterator<Item = (F, S)>,
        F: Into<String>,
        S: Into<String>,
    {
        let item_name = item_name.into();
        if self.state.lock().gates.contains_key(&item_name) {
            return Err(ModelError::DuplicateItem(item_name));
        }
        let mut sources: Vec<String> = Vec::new();
        let mut layout: Vec<(String, usize)> = Vec::new();
        for (field, source) in fields {
            let source = source.into();
            let slot = match sources.iter().position(|s| *s == source) {
                Some(slot) => slot,
                None => {
                    sources.push(source);
                    sources.len() - 1
                }
            };
            layout.push((field.into(), slot));
        }

        let publisher = Publisher {
            model: self.model.downgrade(),
            key: self.key.clone(),
            sentinels: self.sentinels,
            state: self.state.clone(),
        };
        let on_present = {
            let publisher = publisher.clone();
            let name = item_name.clone();
            move |values: &[ModelValue]| {
                let record: BTreeMap<String, ModelValue> = layout
                    .iter()
                    .filter_map(|(field, slot)| values.get(*slot).map(|v| (field.clone(), v.clone())))
                    .collect();
                publisher.insert(&name, ModelValue::Record(record));
            }
        };
        let on_removed = {
            let name = item_name.clone();
            move || publisher.remove(&name)
        };

        let gate = self
            .model
            .register_gate_with_teardown(sources, on_present, on_removed)?;
        log::debug!("[Array] '{}' tracks '{}' via {}", self.key, item_name, gate);
        self.state.lock().gates.insert(item_name, gate);
        Ok(())
    }

    /// Stop tracking an item, dropping it from the list if present.
    pub fn untrack_item(&self, item_name: &str) -> Result<(), ModelError> {
        let gate = {
            let mut state = self.state.lock();
            let gate = state
                .gates
                .remove(item_name)
                .ok_or_else(|| ModelError::UnknownItem(item_name.to_string()))?;
            state.prior_index.remove(item_name);
            gate
        };
        self.model.unregister_gate(gate)
    }

    /// Names of tracked items, present or not.
    pub fn tracked(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().gates.keys().cloned().collect();
        names.sort();
        names
    }

    /// Current item records, in list order.
    pub fn items(&self) -> Vec<ModelValue> {
        self.state
            .lock()
            .items
            .iter()
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Names of the items currently in the list, in list order.
    pub fn item_names(&self) -> Vec<String> {
        self.state
            .lock()
            .items
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Untrack every item and remove the published keys.
    pub fn dispose(self) {
        for name in self.tracked() {
            let _ = self.untrack_item(&name);
        }
        self.model.remove(&self.key);
        if self.sentinels {
            self.model.remove(&self.added_item_key());
            self.model.remove(&self.removed_item_key());
        }
    }
}

impl std::fmt::Debug for ArrayComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayComponent")
            .field("key", &self.key)
            .field("items", &self.item_names())
            .field("sentinels", &self.sentinels)
            .finish()
    }
}

/// The part of an array component captured by its item gates.
#[derive(Clone)]
struct Publisher {
    model: WeakModel,
    key: String,
    sentinels: bool,
    state: Arc<Mutex<ArrayState>>,
}

impl Publisher {
    fn insert(&self, name: &str, record: ModelValue) {
        let (list, inserted) = {
            let mut state = self.state.lock();
            let inserted = match state.items.iter().position(|(n, _)| n == name) {
                Some(pos) => {
                    state.items[pos].1 = record.clone();
                    false
                }
                None => {
                    let at = state
                        .prior_index
                        .remove(name)
                        .map_or(state.items.len(), |i| i.min(state.items.len()));
                    state.items.insert(at, (name.to_string(), record.clone()));
                    true
                }
            };
            (Self::list(&state), inserted)
        };
        self.publish(list, inserted.then_some(("AddedItem", record)));
    }

    fn remove(&self, name: &str) {
        let (list, removed) = {
            let mut state = self.state.lock();
            let Some(pos) = state.items.iter().position(|(n, _)| n == name) else {
                return;
            };
            let (_, record) = state.items.remove(pos);
            if state.gates.contains_key(name) {
                state.prior_index.insert(name.to_string(), pos);
            }
            (Self::list(&state), record)
        };
        self.publish(list, Some(("RemovedItem", removed)));
    }

    fn list(state: &ArrayState) -> ModelValue {
        ModelValue::List(state.items.iter().map(|(_, v)| v.clone()).collect())
    }

    fn publish(&self, list: ModelValue, sentinel: Option<(&str, ModelValue)>) {
        let Some(model) = self.model.upgrade() else { return };
        model.add(self.key.clone(), list);
        if let (true, Some((suffix, record))) = (self.sentinels, sentinel) {
            model.add(format!("{}{}", self.key, suffix), record);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
