//! Shared types for model-tree widgets.
//!
//! Everything a tree renderer and the visibility engine exchange lives here:
//! instance ids, hierarchy nodes and visibility statuses. All types are
//! serde-serializable so a presentation layer can hand nodes over as JSON.

pub mod id;
pub mod node;
pub mod status;

pub use id::*;
pub use node::*;
pub use status::*;
