//! The id-cache boundary: hierarchy lookups the engine needs but does not own.

use async_trait::async_trait;
use model_tree_types::{
    CategoryId, ClassificationId, ClassificationTableId, ElementId, ModelId, SubjectId,
};
use thiserror::Error;

/// Raised (inside `anyhow::Error`) when an id no longer resolves, e.g. because
/// it was deleted between the hierarchy query and the visibility lookup.
///
/// The status computer reports such nodes as `hidden` instead of failing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("unknown model {0}")]
    UnknownModel(ModelId),

    #[error("unknown category {category_id} in model {model_id}")]
    UnknownCategory {
        model_id: ModelId,
        category_id: CategoryId,
    },

    #[error("unknown subject {0}")]
    UnknownSubject(SubjectId),

    #[error("unknown classification {0}")]
    UnknownClassification(ClassificationId),
}

/// Owning model and category of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementInfo {
    pub element_id: ElementId,
    pub model_id: ModelId,
    pub category_id: CategoryId,
}

/// Asynchronous hierarchy lookups.
///
/// Every call is a suspension point for the engine.
#[async_trait]
pub trait IdCache: Send + Sync {
    // ── Spatial containment ──

    async fn get_subject_model_ids(&self, subject_ids: &[SubjectId]) -> anyhow::Result<Vec<ModelId>>;
    async fn get_model_categories(&self, model_id: ModelId) -> anyhow::Result<Vec<CategoryId>>;
    async fn get_category_model_ids(&self, category_id: CategoryId)
        -> anyhow::Result<Vec<ModelId>>;
    async fn get_category_elements_count(
        &self,
        model_id: ModelId,
        category_id: CategoryId,
    ) -> anyhow::Result<usize>;

    // ── Sub-models ──

    /// Elements of the given categories that host a sub-model.
    async fn get_categories_modeled_elements(
        &self,
        model_id: ModelId,
        category_ids: &[CategoryId],
    ) -> anyhow::Result<Vec<ElementId>>;

    /// The model an element hosts, if any.
    async fn get_sub_model(&self, element_id: ElementId) -> anyhow::Result<Option<ModelId>>;

    async fn has_sub_model(&self, element_id: ElementId) -> anyhow::Result<bool> {
        Ok(self.get_sub_model(element_id).await?.is_some())
    }

    // ── Elements ──

    /// Model and category of each element that still exists; unknown ids are
    /// left out of the result.
    async fn get_elements_info(&self, element_ids: &[ElementId]) -> anyhow::Result<Vec<ElementInfo>>;

    // ── Classifications ──

    /// All classifications (at any depth) of the given tables.
    async fn get_table_classifications(
        &self,
        table_ids: &[ClassificationTableId],
    ) -> anyhow::Result<Vec<ClassificationId>>;

    /// Categories related to the given classifications and their descendants.
    async fn get_classification_categories(
        &self,
        classification_ids: &[ClassificationId],
    ) -> anyhow::Result<Vec<CategoryId>>;
}

/// True when `err` only says that some id did not resolve.
pub(crate) fn is_missing_context(err: &anyhow::Error) -> bool {
    err.downcast_ref::<LookupError>().is_some()
}
