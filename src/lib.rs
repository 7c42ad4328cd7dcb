//! # tangible
//!
//! Coordination core for tangible programs: physical markers on a tracked
//! surface that attach and detach pieces of reactive state at runtime.
//!
//! - [`model`]: a reactive key/value store plus dependency gates, derived
//!   components and array components.
//! - [`graph`]: a parent/child forest that propagates an "energized" flag
//!   from roots, driven by adjacency events.
//! - [`peripheral`]: open BLE sessions with at most one in-flight write per
//!   characteristic.
//! - [`surface`]: one self-contained instance of all of the above.
//! - [`script`]: YAML scene scripts replayed against a surface.

pub mod config;
pub mod graph;
pub mod model;
pub mod peripheral;
pub mod script;
pub mod surface;

pub use config::RuntimeConfig;
pub use model::{Model, ModelValue};
pub use surface::Surface;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
