//! Connection elements: the nodes of the connectivity graph.

use std::fmt;

use serde::Serialize;

/// Stable handle to an element in a [`ConnectionGraph`](super::ConnectionGraph).
///
/// Ids are never reused within one graph, so a stale id simply stops
/// resolving once its element has been disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ElementId(pub(crate) u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "element-{}", self.0)
    }
}

/// A node in the connectivity tree.
///
/// Elements are only mutated through the graph; this type exposes read
/// access to their state.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionElement {
    pub(crate) id: ElementId,
    pub(crate) label: String,
    pub(crate) is_root: bool,
    pub(crate) parent: Option<ElementId>,
    /// Owned children, in attach order.
    pub(crate) children: Vec<ElementId>,
    pub(crate) energized: bool,
}

impl ConnectionElement {
    pub(crate) fn new(id: ElementId, label: String, is_root: bool) -> Self {
        Self {
            id,
            label,
            is_root,
            parent: None,
            children: Vec::new(),
            energized: is_root,
        }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn parent(&self) -> Option<ElementId> {
        self.parent
    }

    pub fn children(&self) -> &[ElementId] {
        &self.children
    }

    pub fn is_energized(&self) -> bool {
        self.energized
    }
}

/// A journaled change of an element's energized state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnergizedChange {
    pub element: ElementId,
    pub energized: bool,
}

/// Serializable view of a subtree, produced by
/// [`ConnectionGraph::subtree`](super::ConnectionGraph::subtree).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementTree {
    pub id: ElementId,
    pub label: String,
    pub is_root: bool,
    pub energized: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementTree>,
}
