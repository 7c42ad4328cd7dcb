//! Model store and gate errors.

use thiserror::Error;

use super::gate::GateId;
use super::store::SubscriptionId;

/// Conflicts reported by the model store and the gate manager.
///
/// None of these leave the store in a modified state: the offending call is
/// treated as a no-op.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// The subscription was never issued or has already been released.
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),

    /// The gate was never registered or has already been unregistered.
    #[error("Unknown gate: {0}")]
    UnknownGate(GateId),

    /// A gate listed the same dependency key twice.
    #[error("Duplicate dependency key: {0}")]
    DuplicateDependency(String),

    /// A derived component listed its own key among its dependencies.
    #[error("Derived component '{0}' cannot depend on itself")]
    SelfReferencingDerived(String),

    /// An array item name is already being tracked.
    #[error("Array item already tracked: {0}")]
    DuplicateItem(String),

    /// An array item name is not being tracked.
    #[error("Array item not tracked: {0}")]
    UnknownItem(String),

    /// A value has no model representation.
    #[error("Unsupported value: {0}")]
    UnsupportedValue(String),
}
