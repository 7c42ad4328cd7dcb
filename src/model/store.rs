//! The model store: named components plus change notification.
//!
//! [`Model`] is a cheap, clonable handle to one store. Every mutation goes
//! through a small work queue: the outermost caller drains it, applying each
//! mutation and running gate evaluation before returning. Mutations issued
//! from inside a callback (gate, listener) are appended to the same queue and
//! applied after that callback returns, so no callback is ever re-entered and
//! every callback observes a snapshot consistent with the mutation that
//! triggered it.
//!
//! One thread drains at a time. A mutation submitted from another thread
//! waits for the running drain to finish and is applied on its own thread
//! before the call returns.

use std::any::Any;
use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};

use crate::config::{ModelConfig, ReplacePolicy};

use super::error::ModelError;
use super::event::{ChangeKind, ModelEvent};
use super::gate::{GateEntry, GateId, TeardownCallback};
use super::value::ModelValue;

/// A listener for store change events.
pub type ValueListener = Arc<dyn Fn(&ModelEvent) + Send + Sync>;

/// Handle returned by [`Model::subscribe_to_value`] and [`Model::subscribe_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Subscription {
    id: SubscriptionId,
    /// `None` listens to every key.
    key: Option<String>,
    listener: ValueListener,
}

/// A unit of work on the store's queue.
pub(crate) enum Mutation {
    Add { key: String, value: ModelValue },
    Remove { key: String },
    /// Initial evaluation of a freshly registered gate.
    EvaluateGate(GateId),
    /// Teardown of a gate that was unregistered while active.
    Teardown { gate: GateId, teardown: TeardownCallback },
}

pub(crate) struct ModelInner {
    pub(crate) config: ModelConfig,
    pub(crate) components: Mutex<HashMap<String, ModelValue>>,
    /// Gates in registration order.
    pub(crate) gates: Mutex<Vec<GateEntry>>,
    subscriptions: Mutex<Vec<Subscription>>,
    pending: Mutex<VecDeque<Mutation>>,
    /// Held by the draining thread; the cell marks a drain further up its stack.
    drain: ReentrantMutex<Cell<bool>>,
    sequence: AtomicU64,
    next_id: AtomicU64,
}

/// A reactive, dynamically populated store of named model components.
///
/// Cloning a `Model` yields another handle to the same store. Callbacks
/// that are themselves stored in the model (gates, listeners) should capture
/// a [`WeakModel`] instead to avoid a reference cycle.
///
/// # Example
///
/// ```
/// use tangible::model::{Model, ModelValue};
///
/// let model = Model::new();
/// model.add("lamp.brightness", 0.5);
/// assert!(model.has("lamp.brightness"));
/// assert_eq!(model.get("lamp.brightness"), Some(ModelValue::Scalar(0.5)));
///
/// model.remove("lamp.brightness");
/// assert!(model.get("lamp.brightness").is_none());
/// ```
#[derive(Clone)]
pub struct Model {
    pub(crate) inner: Arc<ModelInner>,
}

/// A non-owning handle to a [`Model`].
#[derive(Clone)]
pub struct WeakModel {
    inner: Weak<ModelInner>,
}

impl WeakModel {
    /// Upgrade to a strong handle if the store is still alive.
    pub fn upgrade(&self) -> Option<Model> {
        self.inner.upgrade().map(|inner| Model { inner })
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("components", &self.inner.components.lock().len())
            .field("gates", &self.inner.gates.lock().len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Model {
    /// Create an empty store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ModelConfig::default())
    }

    /// Create an empty store with the given configuration.
    pub fn with_config(config: ModelConfig) -> Self {
        Self {
            inner: Arc::new(ModelInner {
                config,
                components: Mutex::new(HashMap::new()),
                gates: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(Vec::new()),
                pending: Mutex::new(VecDeque::new()),
                drain: ReentrantMutex::new(Cell::new(false)),
                sequence: AtomicU64::new(0),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// The configuration this store was built with.
    pub fn config(&self) -> &ModelConfig {
        &self.inner.config
    }

    /// Create a non-owning handle.
    pub fn downgrade(&self) -> WeakModel {
        WeakModel {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // --- Write operations ---

    /// Register or replace a component.
    ///
    /// Emits [`ChangeKind::Added`] for a new key and [`ChangeKind::Changed`]
    /// when the key was already present, then re-evaluates every gate that
    /// depends on the key.
    pub fn add(&self, key: impl Into<String>, value: impl Into<ModelValue>) {
        self.submit(Mutation::Add {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Remove a component. Removing an absent key is a no-op.
    pub fn remove(&self, key: &str) {
        self.submit(Mutation::Remove {
            key: key.to_string(),
        });
    }

    // --- Read operations ---

    /// Current value of a component, if present.
    pub fn get(&self, key: &str) -> Option<ModelValue> {
        self.inner.components.lock().get(key).cloned()
    }

    /// Check if a component is present.
    pub fn has(&self, key: &str) -> bool {
        self.inner.components.lock().contains_key(key)
    }

    /// All present keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.components.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of present components.
    pub fn len(&self) -> usize {
        self.inner.components.lock().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.components.lock().is_empty()
    }

    /// Copy of every component, ordered by key.
    pub fn snapshot(&self) -> BTreeMap<String, ModelValue> {
        self.inner
            .components
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    // --- Subscriptions ---

    /// Listen to changes of a single key.
    pub fn subscribe_to_value<F>(&self, key: impl Into<String>, listener: F) -> SubscriptionId
    where
        F: Fn(&ModelEvent) + Send + Sync + 'static,
    {
        self.insert_subscription(Some(key.into()), Arc::new(listener))
    }

    /// Listen to changes of every key.
    pub fn subscribe_all<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&ModelEvent) + Send + Sync + 'static,
    {
        self.insert_subscription(None, Arc::new(listener))
    }

    /// Release a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ModelError> {
        let mut subscriptions = self.inner.subscriptions.lock();
        match subscriptions.iter().position(|s| s.id == id) {
            Some(pos) => {
                subscriptions.remove(pos);
                Ok(())
            }
            None => {
                log::warn!("[Model] unsubscribe called with unknown handle {}", id);
                Err(ModelError::UnknownSubscription(id))
            }
        }
    }

    fn insert_subscription(&self, key: Option<String>, listener: ValueListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id());
        self.inner
            .subscriptions
            .lock()
            .push(Subscription { id, key, listener });
        id
    }

    // --- Queue ---

    pub(crate) fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Enqueue a mutation and drain the queue unless a drain is already
    /// running further up the stack.
    ///
    /// Other threads block on the drain lock until the running drain is
    /// done, so their mutations are applied before their call returns.
    pub(crate) fn submit(&self, mutation: Mutation) {
        let turn = self.inner.drain.lock();
        self.inner.pending.lock().push_back(mutation);
        if turn.replace(true) {
            // Re-entrant call from a callback: the outer drain picks it up.
            return;
        }
        self.drain();
        turn.set(false);
    }

    fn drain(&self) {
        let limit = self.inner.config.max_cascade;
        let mut processed = 0usize;
        loop {
            let next = self.inner.pending.lock().pop_front();
            let mutation = match next {
                Some(m) => m,
                None => break,
            };
            processed += 1;
            if processed > limit {
                let discarded = {
                    let mut pending = self.inner.pending.lock();
                    let n = pending.len();
                    pending.clear();
                    n + 1
                };
                log::error!(
                    "[Model] cascade limit of {} mutations exceeded; discarding {} queued mutations",
                    limit,
                    discarded
                );
                break;
            }
            self.apply(mutation);
        }
    }

    fn apply(&self, mutation: Mutation) {
        match mutation {
            Mutation::Add { key, value } => self.apply_add(key, value),
            Mutation::Remove { key } => self.apply_remove(key),
            Mutation::EvaluateGate(id) => self.evaluate_gate(id, ChangeKind::Added, None),
            Mutation::Teardown { gate, teardown } => {
                log::debug!("[Model] gate {} torn down on unregister", gate);
                run_guarded("gate teardown", || teardown());
            }
        }
    }

    fn apply_add(&self, key: String, value: ModelValue) {
        let previous = self
            .inner
            .components
            .lock()
            .insert(key.clone(), value.clone());
        let kind = if previous.is_some() {
            ChangeKind::Changed
        } else {
            ChangeKind::Added
        };

        let event = self.next_event(key, kind, Some(value));
        log::debug!("[Model] {}", event);
        self.notify_listeners(&event);

        if kind == ChangeKind::Changed
            && self.inner.config.replace_policy == ReplacePolicy::RemoveThenAdd
        {
            // Replacement is seen by gates as the key vanishing and returning.
            self.evaluate_gates(&event.key, ChangeKind::Removed, Some(&event.key));
            self.evaluate_gates(&event.key, ChangeKind::Added, None);
        } else {
            self.evaluate_gates(&event.key, kind, None);
        }
    }

    fn apply_remove(&self, key: String) {
        if self.inner.components.lock().remove(&key).is_none() {
            return;
        }
        let event = self.next_event(key, ChangeKind::Removed, None);
        log::debug!("[Model] {}", event);
        self.notify_listeners(&event);
        self.evaluate_gates(&event.key, ChangeKind::Removed, None);
    }

    fn next_event(&self, key: String, kind: ChangeKind, value: Option<ModelValue>) -> ModelEvent {
        ModelEvent {
            sequence: self.inner.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            key,
            kind,
            value,
        }
    }

    fn notify_listeners(&self, event: &ModelEvent) {
        let listeners: Vec<ValueListener> = self
            .inner
            .subscriptions
            .lock()
            .iter()
            .filter(|s| s.key.as_deref().map_or(true, |k| k == event.key))
            .map(|s| s.listener.clone())
            .collect();
        for listener in listeners {
            run_guarded("value listener", || listener(event));
        }
    }
}

/// Run a callback, logging instead of propagating a panic.
pub(crate) fn run_guarded(context: &str, f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        log::error!("[Model] {} panicked: {}", context, panic_message(panic.as_ref()));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
