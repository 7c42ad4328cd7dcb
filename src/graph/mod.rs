//! Connectivity graph: a forest that propagates an "energized" flag.
//!
//! Programs placed next to each other on the surface form parent/child links
//! at runtime. Roots (power sources) are always energized; any other element
//! is energized exactly when its chain of parents ends at a root. Structural
//! changes push the new state down the affected subtree and journal every
//! flip, and [`AdjacencyRouter`] republishes those flips into the model
//! store once the graph lock has been released.

pub mod adjacency;
pub mod element;
pub mod error;
pub mod tree;

pub use self::adjacency::{
    element_key, energized_key, is_reserved_component, AdjacencyRouter, RESERVED_COMPONENTS,
};
pub use self::element::{ConnectionElement, ElementId, ElementTree, EnergizedChange};
pub use self::error::GraphError;
pub use self::tree::{ConnectionGraph, SharedGraph};
