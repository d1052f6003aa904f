//! Hierarchy shapes.
//!
//! The engine is the same for every tree; a shape only says what a node stands
//! for. [`HierarchyShape::resolve`] maps a node to the concrete subjects,
//! models, categories, sub-categories or elements whose visibility it shows.
//! Status computation and change planning work on those targets only.

use async_trait::async_trait;
use model_tree_types::{
    CategoryId, ElementId, HierarchyNode, ModelId, NodeKey, SubCategoryId, SubjectId,
};

use crate::id_cache::IdCache;

/// What a node's visibility is made of.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VisibilityTarget {
    Subjects(Vec<SubjectId>),
    Models(Vec<ModelId>),
    /// Categories under one model, or under every model containing them when
    /// `model_id` is `None`.
    Categories {
        model_id: Option<ModelId>,
        category_ids: Vec<CategoryId>,
    },
    SubCategories {
        model_id: ModelId,
        category_id: CategoryId,
        sub_category_ids: Vec<SubCategoryId>,
    },
    Elements {
        model_id: ModelId,
        category_id: CategoryId,
        element_ids: Vec<ElementId>,
    },
}

/// Capability interface over one kind of tree.
#[async_trait]
pub trait HierarchyShape: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether elements hosting sub-models pull the sub-model's visibility in.
    fn considers_sub_models(&self) -> bool;

    /// Targets of `node`, or `None` when the node cannot be resolved (unknown
    /// kind or missing model/category data).
    async fn resolve(
        &self,
        node: &HierarchyNode,
        id_cache: &dyn IdCache,
    ) -> anyhow::Result<Option<Vec<VisibilityTarget>>>;
}

/// Elements below their owning model and category.
fn element_target(node: &HierarchyNode, element_ids: &[ElementId]) -> Option<VisibilityTarget> {
    Some(VisibilityTarget::Elements {
        model_id: node.model_id()?,
        category_id: node.category_id()?,
        element_ids: element_ids.to_vec(),
    })
}

// ============================================================================
// MODELS TREE
// ============================================================================

/// Subjects → models → categories → elements, keyed by spatial containment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModelsTreeShape;

#[async_trait]
impl HierarchyShape for ModelsTreeShape {
    fn name(&self) -> &'static str {
        "models-tree"
    }

    fn considers_sub_models(&self) -> bool {
        true
    }

    async fn resolve(
        &self,
        node: &HierarchyNode,
        _id_cache: &dyn IdCache,
    ) -> anyhow::Result<Option<Vec<VisibilityTarget>>> {
        let target = match &node.key {
            NodeKey::Subject { ids } => Some(VisibilityTarget::Subjects(ids.clone())),
            NodeKey::Model { ids } => Some(VisibilityTarget::Models(ids.clone())),
            NodeKey::Category { ids } => Some(VisibilityTarget::Categories {
                model_id: node.model_id(),
                category_ids: ids.clone(),
            }),
            NodeKey::SubCategory { ids } => match (node.model_id(), node.category_id()) {
                (Some(model_id), Some(category_id)) => Some(VisibilityTarget::SubCategories {
                    model_id,
                    category_id,
                    sub_category_ids: ids.clone(),
                }),
                _ => None,
            },
            NodeKey::Element { ids } | NodeKey::ClassGrouping { ids, .. } => {
                element_target(node, ids)
            }
            NodeKey::ClassificationTable { .. } | NodeKey::Classification { .. } => None,
        };
        Ok(target.map(|t| vec![t]))
    }
}

// ============================================================================
// CLASSIFICATIONS TREE
// ============================================================================

/// Classification tables → classifications → categories → elements.
///
/// Categories here have no owning model; they are shown over every model
/// that contains them. Sub-models are not followed.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClassificationsTreeShape;

#[async_trait]
impl HierarchyShape for ClassificationsTreeShape {
    fn name(&self) -> &'static str {
        "classifications-tree"
    }

    fn considers_sub_models(&self) -> bool {
        false
    }

    async fn resolve(
        &self,
        node: &HierarchyNode,
        id_cache: &dyn IdCache,
    ) -> anyhow::Result<Option<Vec<VisibilityTarget>>> {
        let target = match &node.key {
            NodeKey::ClassificationTable { ids } => {
                let classifications = id_cache.get_table_classifications(ids).await?;
                let category_ids = if classifications.is_empty() {
                    Vec::new()
                } else {
                    id_cache
                        .get_classification_categories(&classifications)
                        .await?
                };
                Some(VisibilityTarget::Categories {
                    model_id: None,
                    category_ids,
                })
            }
            NodeKey::Classification { ids } => Some(VisibilityTarget::Categories {
                model_id: None,
                category_ids: id_cache.get_classification_categories(ids).await?,
            }),
            NodeKey::Category { ids } => Some(VisibilityTarget::Categories {
                model_id: node.model_id(),
                category_ids: ids.clone(),
            }),
            NodeKey::Element { ids } | NodeKey::ClassGrouping { ids, .. } => {
                element_target(node, ids)
            }
            NodeKey::Subject { .. } | NodeKey::Model { .. } | NodeKey::SubCategory { .. } => None,
        };
        Ok(target.map(|t| vec![t]))
    }
}
