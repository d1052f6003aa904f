//! Filtered-tree boundary.
//!
//! While a hierarchy filter is active, some nodes are shown only because a
//! descendant matched. Such a node stands for the matching descendants, not for
//! everything below it, so its targets come from the filtered-tree provider.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use model_tree_types::{HierarchyNode, NodeIdentity};

use crate::shape::VisibilityTarget;

#[async_trait]
pub trait FilteredTree: Send + Sync {
    /// Concrete targets a filtered branch node stands for.
    async fn targets(&self, node: &HierarchyNode) -> anyhow::Result<Vec<VisibilityTarget>>;
}

/// Filtered tree with precomputed targets per node identity.
///
/// Unregistered nodes resolve to no targets.
#[derive(Debug, Default)]
pub struct MemoryFilteredTree {
    targets: Mutex<HashMap<NodeIdentity, Vec<VisibilityTarget>>>,
}

impl MemoryFilteredTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, node: &HierarchyNode, targets: Vec<VisibilityTarget>) {
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node.identity(), targets);
    }
}

#[async_trait]
impl FilteredTree for MemoryFilteredTree {
    async fn targets(&self, node: &HierarchyNode) -> anyhow::Result<Vec<VisibilityTarget>> {
        Ok(self
            .targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&node.identity())
            .cloned()
            .unwrap_or_default())
    }
}
