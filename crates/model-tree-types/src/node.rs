//! Hierarchy nodes as handed over by the hierarchy provider.
//!
//! Nodes are immutable values. The visibility engine never owns them; it only
//! reads their key, depth and extended data.

use serde::{Deserialize, Serialize};

use crate::id::{
    CategoryId, ClassificationId, ClassificationTableId, ElementId, ModelId, SubCategoryId,
    SubjectId,
};

// ─── Node key ─────────────────────────────────────────────────

/// Stable key of a hierarchy node.
///
/// Every variant carries one or more instance ids: identically labeled source
/// instances may be merged into one logical node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeKey {
    Subject {
        ids: Vec<SubjectId>,
    },
    Model {
        ids: Vec<ModelId>,
    },
    Category {
        ids: Vec<CategoryId>,
    },
    SubCategory {
        ids: Vec<SubCategoryId>,
    },
    Element {
        ids: Vec<ElementId>,
    },
    /// Synthetic node grouping elements of one class under a category.
    #[serde(rename_all = "camelCase")]
    ClassGrouping {
        class_name: String,
        ids: Vec<ElementId>,
    },
    ClassificationTable {
        ids: Vec<ClassificationTableId>,
    },
    Classification {
        ids: Vec<ClassificationId>,
    },
}

impl NodeKey {
    pub fn ids(&self) -> &[crate::Id64] {
        match self {
            NodeKey::Subject { ids }
            | NodeKey::Model { ids }
            | NodeKey::Category { ids }
            | NodeKey::SubCategory { ids }
            | NodeKey::Element { ids }
            | NodeKey::ClassGrouping { ids, .. }
            | NodeKey::ClassificationTable { ids }
            | NodeKey::Classification { ids } => ids,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeKey::Subject { .. } => "subject",
            NodeKey::Model { .. } => "model",
            NodeKey::Category { .. } => "category",
            NodeKey::SubCategory { .. } => "subCategory",
            NodeKey::Element { .. } => "element",
            NodeKey::ClassGrouping { .. } => "classGrouping",
            NodeKey::ClassificationTable { .. } => "classificationTable",
            NodeKey::Classification { .. } => "classification",
        }
    }
}

// ─── Metadata ─────────────────────────────────────────────────

/// Spatial dimensionality of the content behind a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Dimension {
    Spatial3d,
    Drawing2d,
}

/// Owning model / category carried by nodes below the model level.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExtendedData {
    #[serde(default)]
    pub model_id: Option<ModelId>,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    #[serde(default)]
    pub dimension: Option<Dimension>,
}

/// Filtering metadata attached while a hierarchy filter is active.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFiltering {
    /// The node itself matched the filter.
    #[serde(default)]
    pub is_filter_target: bool,
    /// Some ancestor matched the filter, so the whole subtree is shown.
    #[serde(default)]
    pub has_filter_target_ancestor: bool,
    /// Key paths (relative to this node) leading to descendant filter targets.
    #[serde(default)]
    pub filtered_child_paths: Vec<Vec<NodeKey>>,
}

// ─── Node ─────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyNode {
    pub key: NodeKey,
    #[serde(default)]
    pub label: String,
    /// Distance from the hierarchy root.
    pub depth: usize,
    #[serde(default)]
    pub extended_data: NodeExtendedData,
    #[serde(default)]
    pub filtering: Option<NodeFiltering>,
}

/// Identity of a request slot: the same key at the same depth.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeIdentity {
    pub key: NodeKey,
    pub depth: usize,
}

impl HierarchyNode {
    pub fn new(key: NodeKey) -> Self {
        Self {
            key,
            label: String::new(),
            depth: 0,
            extended_data: NodeExtendedData::default(),
            filtering: None,
        }
    }

    pub fn subject(ids: impl Into<Vec<SubjectId>>) -> Self {
        Self::new(NodeKey::Subject { ids: ids.into() })
    }

    pub fn model(ids: impl Into<Vec<ModelId>>) -> Self {
        Self::new(NodeKey::Model { ids: ids.into() }).at_depth(1)
    }

    /// Category node below `model_id`.
    pub fn category(model_id: ModelId, ids: impl Into<Vec<CategoryId>>) -> Self {
        let mut node = Self::new(NodeKey::Category { ids: ids.into() }).at_depth(2);
        node.extended_data.model_id = Some(model_id);
        node
    }

    pub fn sub_category(
        model_id: ModelId,
        category_id: CategoryId,
        ids: impl Into<Vec<SubCategoryId>>,
    ) -> Self {
        let mut node = Self::new(NodeKey::SubCategory { ids: ids.into() }).at_depth(3);
        node.extended_data.model_id = Some(model_id);
        node.extended_data.category_id = Some(category_id);
        node
    }

    pub fn element(
        model_id: ModelId,
        category_id: CategoryId,
        ids: impl Into<Vec<ElementId>>,
    ) -> Self {
        let mut node = Self::new(NodeKey::Element { ids: ids.into() }).at_depth(3);
        node.extended_data.model_id = Some(model_id);
        node.extended_data.category_id = Some(category_id);
        node
    }

    pub fn class_grouping(
        model_id: ModelId,
        category_id: CategoryId,
        class_name: impl Into<String>,
        ids: impl Into<Vec<ElementId>>,
    ) -> Self {
        let mut node = Self::new(NodeKey::ClassGrouping {
            class_name: class_name.into(),
            ids: ids.into(),
        })
        .at_depth(3);
        node.extended_data.model_id = Some(model_id);
        node.extended_data.category_id = Some(category_id);
        node
    }

    pub fn classification_table(ids: impl Into<Vec<ClassificationTableId>>) -> Self {
        Self::new(NodeKey::ClassificationTable { ids: ids.into() })
    }

    pub fn classification(ids: impl Into<Vec<ClassificationId>>) -> Self {
        Self::new(NodeKey::Classification { ids: ids.into() }).at_depth(1)
    }

    pub fn at_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.extended_data.dimension = Some(dimension);
        self
    }

    pub fn with_filtering(mut self, filtering: NodeFiltering) -> Self {
        self.filtering = Some(filtering);
        self
    }

    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity {
            key: self.key.clone(),
            depth: self.depth,
        }
    }

    pub fn model_id(&self) -> Option<ModelId> {
        self.extended_data.model_id
    }

    pub fn category_id(&self) -> Option<CategoryId> {
        self.extended_data.category_id
    }

    /// True when the node is displayed only because some descendant matched the
    /// active filter; its visibility is then defined by those descendants alone.
    pub fn is_filtered_branch(&self) -> bool {
        self.filtering.as_ref().is_some_and(|f| {
            !f.is_filter_target
                && !f.has_filter_target_ancestor
                && !f.filtered_child_paths.is_empty()
        })
    }
}
