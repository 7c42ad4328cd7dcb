//! Connectivity graph errors.

use thiserror::Error;

use super::element::ElementId;

/// Structural conflicts reported by the graph and the adjacency router.
///
/// Every variant leaves the graph unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The element was never created or has been disposed.
    #[error("Unknown element: {0}")]
    UnknownElement(ElementId),

    /// The child already has a parent.
    #[error("{child} is already a child of {parent}")]
    AlreadyParented { child: ElementId, parent: ElementId },

    /// Roots cannot be attached beneath another element.
    #[error("Root {0} cannot be attached as a child")]
    RootAsChild(ElementId),

    /// The link would make an element its own ancestor.
    #[error("Attaching {child} under {parent} would create a cycle")]
    WouldCycle { parent: ElementId, child: ElementId },

    /// The child is not attached to the given parent.
    #[error("{child} is not a child of {parent}")]
    NotAChild { parent: ElementId, child: ElementId },

    /// No element is published for the program.
    #[error("Program has no connection element: {0}")]
    UnknownProgram(String),

    /// The program already has an element.
    #[error("Program already has a connection element: {0}")]
    ProgramAttached(String),
}
