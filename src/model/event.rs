//! Change events emitted by the model store.

use std::fmt;

use serde::Serialize;

use super::value::ModelValue;

/// What happened to a component key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// The key was absent and is now present.
    Added,
    /// The key was present and received a new value.
    Changed,
    /// The key was present and is now absent.
    Removed,
}

impl ChangeKind {
    /// Whether the key is present after this change.
    pub fn is_present(&self) -> bool {
        !matches!(self, ChangeKind::Removed)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "added"),
            ChangeKind::Changed => write!(f, "changed"),
            ChangeKind::Removed => write!(f, "removed"),
        }
    }
}

/// A single structured change notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelEvent {
    /// Monotonic sequence number within one store.
    pub sequence: u64,
    /// The component key that changed.
    pub key: String,
    /// Kind of change.
    pub kind: ChangeKind,
    /// The new value; `None` for removals.
    pub value: Option<ModelValue>,
}

impl fmt::Display for ModelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "#{} {} {} ({})", self.sequence, self.key, self.kind, v.kind()),
            None => write!(f, "#{} {} {}", self.sequence, self.key, self.kind),
        }
    }
}
