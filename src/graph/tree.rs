//! The connectivity graph arena.
//!
//! A forest of [`ConnectionElement`]s keyed by [`ElementId`]. Roots are
//! always energized; every other element carries the energized state of its
//! parent as of the last structural change. The only writer of that state
//! is the internal propagation step, which pushes a value down a whole
//! subtree and journals each element whose state actually flipped.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::element::{ConnectionElement, ElementId, ElementTree, EnergizedChange};
use super::error::GraphError;

/// A graph shared between the adjacency router and other readers.
pub type SharedGraph = Arc<Mutex<ConnectionGraph>>;

#[derive(Debug, Default)]
pub struct ConnectionGraph {
    elements: HashMap<ElementId, ConnectionElement>,
    next_id: u64,
    changes: Vec<EnergizedChange>,
}

impl ConnectionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty graph behind a shared lock.
    pub fn shared() -> SharedGraph {
        Arc::new(Mutex::new(Self::new()))
    }

    // --- Construction ---

    /// Create a root element. Roots are energized for their whole lifetime.
    pub fn create_root(&mut self, label: impl Into<String>) -> ElementId {
        self.insert(label.into(), true)
    }

    /// Create a detached, de-energized element.
    pub fn create_element(&mut self, label: impl Into<String>) -> ElementId {
        self.insert(label.into(), false)
    }

    fn insert(&mut self, label: String, is_root: bool) -> ElementId {
        self.next_id += 1;
        let id = ElementId(self.next_id);
        log::debug!("[Graph] create {} '{}' (root: {})", id, label, is_root);
        self.elements
            .insert(id, ConnectionElement::new(id, label, is_root));
        id
    }

    // --- Structure ---

    /// Attach `child` beneath `parent` and hand it the parent's energized
    /// state.
    pub fn add_child(&mut self, parent: ElementId, child: ElementId) -> Result<(), GraphError> {
        let parent_energized = self.get(parent)?.energized;
        let node = self.get(child)?;
        if node.is_root {
            return Err(self.conflict(GraphError::RootAsChild(child)));
        }
        if let Some(current) = node.parent {
            return Err(self.conflict(GraphError::AlreadyParented {
                child,
                parent: current,
            }));
        }
        if parent == child || self.ancestors(parent).any(|a| a == child) {
            return Err(self.conflict(GraphError::WouldCycle { parent, child }));
        }

        if let Some(node) = self.elements.get_mut(&child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.elements.get_mut(&parent) {
            node.children.push(child);
        }
        log::debug!("[Graph] {} -> {}", parent, child);
        self.set_energized(child, parent_energized);
        Ok(())
    }

    /// Detach `child` from `parent` and re-derive its energized state.
    pub fn remove_child(&mut self, parent: ElementId, child: ElementId) -> Result<(), GraphError> {
        self.get(parent)?;
        if self.get(child)?.parent != Some(parent) {
            return Err(self.conflict(GraphError::NotAChild { parent, child }));
        }

        if let Some(node) = self.elements.get_mut(&parent) {
            node.children.retain(|c| *c != child);
        }
        if let Some(node) = self.elements.get_mut(&child) {
            node.parent = None;
        }
        log::debug!("[Graph] {} -/- {}", parent, child);
        let connected = self.is_connected_to_source(child);
        self.set_energized(child, connected);
        Ok(())
    }

    /// Detach an element from its parent and from each of its children, then
    /// drop it from the arena.
    pub fn dispose(&mut self, id: ElementId) -> Result<(), GraphError> {
        let node = self.get(id)?;
        let parent = node.parent;
        let children = node.children.clone();

        if let Some(parent) = parent {
            self.remove_child(parent, id)?;
        }
        for child in children {
            self.remove_child(id, child)?;
        }
        self.elements.remove(&id);
        self.changes.retain(|c| c.element != id);
        log::debug!("[Graph] dispose {}", id);
        Ok(())
    }

    /// Push `value` down the subtree rooted at `id`.
    fn set_energized(&mut self, id: ElementId, value: bool) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.elements.get_mut(&current) else {
                continue;
            };
            let value = value || node.is_root;
            if node.energized != value {
                node.energized = value;
                self.changes.push(EnergizedChange {
                    element: current,
                    energized: value,
                });
            }
            stack.extend(node.children.iter().rev().copied());
        }
    }

    // --- Queries ---

    pub fn is_energized(&self, id: ElementId) -> Option<bool> {
        self.elements.get(&id).map(|e| e.energized)
    }

    /// Walk toward the top of the tree; true only if the walk ends at a root.
    pub fn is_connected_to_source(&self, id: ElementId) -> bool {
        let Some(node) = self.elements.get(&id) else {
            return false;
        };
        if node.is_root {
            return true;
        }
        self.ancestors(id)
            .last()
            .and_then(|top| self.elements.get(&top))
            .is_some_and(|top| top.is_root)
    }

    pub fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.elements.get(&id).and_then(|e| e.parent)
    }

    /// Children in attach order; empty for unknown ids.
    pub fn children(&self, id: ElementId) -> Vec<ElementId> {
        self.elements
            .get(&id)
            .map(|e| e.children.clone())
            .unwrap_or_default()
    }

    pub fn element(&self, id: ElementId) -> Option<&ConnectionElement> {
        self.elements.get(&id)
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.elements.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// All root elements, oldest first.
    pub fn roots(&self) -> Vec<ElementId> {
        let mut roots: Vec<ElementId> = self
            .elements
            .values()
            .filter(|e| e.is_root)
            .map(|e| e.id)
            .collect();
        roots.sort();
        roots
    }

    /// Visit the subtree under `start` in pre-order, children in attach
    /// order. The visitor receives the depth relative to `start`.
    pub fn walk_down_tree<F>(&self, start: ElementId, mut visitor: F) -> Result<(), GraphError>
    where
        F: FnMut(usize, &ConnectionElement),
    {
        self.get(start)?;
        let mut stack = vec![(start, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let Some(node) = self.elements.get(&id) else {
                continue;
            };
            visitor(depth, node);
            stack.extend(node.children.iter().rev().map(|c| (*c, depth + 1)));
        }
        Ok(())
    }

    /// Build a serializable copy of the subtree under `start`.
    pub fn subtree(&self, start: ElementId) -> Result<ElementTree, GraphError> {
        // Open path from `start` down to the node being visited.
        let mut path: Vec<ElementTree> = Vec::new();
        self.walk_down_tree(start, |depth, node| {
            while path.len() > depth {
                close_last(&mut path);
            }
            path.push(ElementTree {
                id: node.id,
                label: node.label.clone(),
                is_root: node.is_root,
                energized: node.energized,
                children: Vec::new(),
            });
        })?;
        while path.len() > 1 {
            close_last(&mut path);
        }
        path.pop().ok_or(GraphError::UnknownElement(start))
    }

    /// Take every energized change journaled since the last call.
    pub fn drain_changes(&mut self) -> Vec<EnergizedChange> {
        std::mem::take(&mut self.changes)
    }

    // --- Internals ---

    fn get(&self, id: ElementId) -> Result<&ConnectionElement, GraphError> {
        self.elements
            .get(&id)
            .ok_or(GraphError::UnknownElement(id))
    }

    fn conflict(&self, err: GraphError) -> GraphError {
        log::warn!("[Graph] rejected: {}", err);
        err
    }

    /// Parent, grandparent, ... up to the top of the tree.
    fn ancestors(&self, id: ElementId) -> impl Iterator<Item = ElementId> + '_ {
        std::iter::successors(self.parent(id), move |current| self.parent(*current))
    }
}

fn close_last(path: &mut Vec<ElementTree>) {
    if let Some(done) = path.pop() {
        if let Some(parent) = path.last_mut() {
            parent.children.push(done);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
