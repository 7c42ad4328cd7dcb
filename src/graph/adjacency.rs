//! Adjacency routing: physical adjacency events applied to the graph and
//! mirrored into the model store.
//!
//! Each attached program owns one element, published as
//! `"{program}.element"` (an opaque handle holding the [`ElementId`]) and
//! `"{program}.energized"` (a bool). Gates can therefore react to a program
//! becoming energized like to any other component.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::model::{Model, ModelValue};

use super::element::{ElementId, EnergizedChange};
use super::error::GraphError;
use super::tree::SharedGraph;

/// Component names the router publishes for every attached program.
pub const RESERVED_COMPONENTS: [&str; 2] = ["element", "energized"];

/// Whether a program component name collides with a router-owned key.
pub fn is_reserved_component(name: &str) -> bool {
    RESERVED_COMPONENTS.contains(&name)
}

/// Store key holding a program's element handle.
pub fn element_key(program: &str) -> String {
    format!("{program}.element")
}

/// Store key holding a program's energized flag.
pub fn energized_key(program: &str) -> String {
    format!("{program}.energized")
}

pub struct AdjacencyRouter {
    model: Model,
    graph: SharedGraph,
    /// Element → owning program, for republishing journaled changes.
    owners: Mutex<HashMap<ElementId, String>>,
}

impl AdjacencyRouter {
    pub fn new(model: Model, graph: SharedGraph) -> Self {
        Self {
            model,
            graph,
            owners: Mutex::new(HashMap::new()),
        }
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    /// The element published for `program`, looked up through the store.
    pub fn element_of(&self, program: &str) -> Option<ElementId> {
        self.model
            .get(&element_key(program))
            .and_then(|v| v.downcast_handle::<ElementId>().copied())
    }

    /// Create an element for a program and publish it.
    pub fn attach_program(&self, program: &str, is_root: bool) -> Result<ElementId, GraphError> {
        if self.element_of(program).is_some() {
            log::warn!("[Adjacency] program '{}' is already attached", program);
            return Err(GraphError::ProgramAttached(program.to_string()));
        }
        let (id, energized) = {
            let mut graph = self.graph.lock();
            let id = if is_root {
                graph.create_root(program)
            } else {
                graph.create_element(program)
            };
            (id, graph.is_energized(id).unwrap_or(is_root))
        };
        self.owners.lock().insert(id, program.to_string());
        log::info!("[Adjacency] attached '{}' as {}", program, id);
        self.model.add(element_key(program), ModelValue::handle(id));
        self.model.add(energized_key(program), energized);
        Ok(id)
    }

    /// `child` was placed next to `parent`.
    pub fn adjacent(&self, parent: &str, child: &str) -> Result<(), GraphError> {
        let (p, c) = self.lookup_pair(parent, child)?;
        let changes = {
            let mut graph = self.graph.lock();
            graph.add_child(p, c)?;
            graph.drain_changes()
        };
        log::debug!("[Adjacency] '{}' adjacent to '{}'", child, parent);
        self.publish(changes);
        Ok(())
    }

    /// `child` was moved away from `parent`.
    pub fn separated(&self, parent: &str, child: &str) -> Result<(), GraphError> {
        let (p, c) = self.lookup_pair(parent, child)?;
        let changes = {
            let mut graph = self.graph.lock();
            graph.remove_child(p, c)?;
            graph.drain_changes()
        };
        log::debug!("[Adjacency] '{}' separated from '{}'", child, parent);
        self.publish(changes);
        Ok(())
    }

    /// Dispose the program's element and withdraw both of its keys.
    pub fn detach_program(&self, program: &str) -> Result<(), GraphError> {
        let id = self
            .element_of(program)
            .ok_or_else(|| GraphError::UnknownProgram(program.to_string()))?;
        let changes = {
            let mut graph = self.graph.lock();
            graph.dispose(id)?;
            graph.drain_changes()
        };
        self.owners.lock().remove(&id);
        log::info!("[Adjacency] detached '{}'", program);
        self.model.remove(&element_key(program));
        self.model.remove(&energized_key(program));
        self.publish(changes);
        Ok(())
    }

    /// Programs with an attached element, sorted.
    pub fn attached(&self) -> Vec<String> {
        let mut programs: Vec<String> = self.owners.lock().values().cloned().collect();
        programs.sort();
        programs
    }

    fn lookup_pair(&self, parent: &str, child: &str) -> Result<(ElementId, ElementId), GraphError> {
        let p = self
            .element_of(parent)
            .ok_or_else(|| GraphError::UnknownProgram(parent.to_string()))?;
        let c = self
            .element_of(child)
            .ok_or_else(|| GraphError::UnknownProgram(child.to_string()))?;
        Ok((p, c))
    }

    /// Republish journaled changes. Runs without the graph lock, so store
    /// callbacks may route further adjacency events.
    fn publish(&self, changes: Vec<EnergizedChange>) {
        let updates: Vec<(String, bool)> = {
            let owners = self.owners.lock();
            changes
                .into_iter()
                .filter_map(|c| owners.get(&c.element).map(|p| (p.clone(), c.energized)))
                .collect()
        };
        for (program, energized) in updates {
            self.model.add(energized_key(&program), energized);
        }
    }
}

impl std::fmt::Debug for AdjacencyRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdjacencyRouter")
            .field("attached", &self.attached())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
