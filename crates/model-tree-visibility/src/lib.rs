//! Hierarchical visibility engine for model trees.
//!
//! Keeps the visible / hidden / partial state of tree nodes (subjects, models,
//! categories, elements, classifications) in step with a viewport that anyone
//! may mutate at any time.
//!
//! ```text
//!  tree renderer ──► VisibilityEngine ──► RequestCoordinator (supersession)
//!                          │                    │
//!                          │              StatusComputer ──► ElementSetCache
//!                          │                    │                 │
//!                          │               HierarchyShape      IdCache
//!                          ▼
//!                    change planning ──► ChangeQueue ──► Viewport ──► EventCoalescer
//!                                                                       │
//!                        on_visibility_change() ◄───────────────────────┘
//! ```
//!
//! The viewport and the id cache are collaborators behind traits; in-memory
//! versions live in [`memory`].

pub mod changer;
pub mod coalescer;
pub mod computer;
pub mod config;
pub mod coordinator;
pub mod element_sets;
pub mod engine;
pub mod error;
pub mod filtered;
pub mod id_cache;
pub mod memory;
pub mod models;
pub mod queue;
pub mod shape;
pub mod viewport;

pub use changer::ViewportOp;
pub use coalescer::{EventCoalescer, SuppressionGuard, VisibilityChange};
pub use computer::StatusComputer;
pub use config::VisibilityConfig;
pub use coordinator::{RequestCoordinator, RequestTicket};
pub use element_sets::{ElementScope, ElementSetCache, SetKind};
pub use engine::{VisibilityEngine, VisibilityEngineBuilder};
pub use error::{VisibilityError, VisibilityResult};
pub use filtered::{FilteredTree, MemoryFilteredTree};
pub use id_cache::{ElementInfo, IdCache, LookupError};
pub use memory::{MemoryIdCache, MemoryViewport};
pub use models::{
    are_all_models_visible, hide_all_models, invert_all_models, show_all_models, toggle_models,
};
pub use queue::{BatchCompletion, ChangeQueue, QueueJob};
pub use shape::{ClassificationsTreeShape, HierarchyShape, ModelsTreeShape, VisibilityTarget};
pub use viewport::{
    CategoryOverride, ListenerId, ViewType, Viewport, ViewportEvent, ViewportListener,
};

pub use model_tree_types;
