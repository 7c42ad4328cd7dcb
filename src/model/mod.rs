//! Reactive model store and dependency gates.
//!
//! Programs on the surface publish named components into a shared [`Model`].
//! Components appear and disappear in no particular order, so anything that
//! needs several of them registers a gate: a callback that runs once all of
//! its keys exist and a teardown that runs as soon as one of them vanishes.
//!
//! Invariants:
//!
//! - A gate is active iff every one of its keys is present. No gate is ever
//!   active with a key missing, and none stays inactive after the store has
//!   settled with all of its keys present.
//! - Each inactive → active transition calls `on_all_present` exactly once,
//!   and each active → inactive transition calls `on_any_removed` at most
//!   once.
//! - Gates affected by the same mutation are evaluated in registration order.
//! - Mutations issued from callbacks are applied after the callback returns
//!   and before the outermost store call returns.
//!
//! [`DerivedComponent`] and [`ArrayComponent`] are built on top of gates.

pub mod array;
pub mod derived;
pub mod error;
pub mod event;
pub mod gate;
pub mod store;
pub mod value;

pub use self::array::ArrayComponent;
pub use self::derived::DerivedComponent;
pub use self::error::ModelError;
pub use self::event::{ChangeKind, ModelEvent};
pub use self::gate::{GateCallback, GateId, TeardownCallback};
pub use self::store::{Model, SubscriptionId, ValueListener, WeakModel};
pub use self::value::{ModelValue, OpaqueHandle};
