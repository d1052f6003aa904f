//! The viewport boundary.
//!
//! A viewport holds the override layers the engine reconciles against: model and
//! category selectors, per-model category overrides, the always/never-drawn
//! element sets and the exclusive-always-drawn flag. The engine never owns this
//! state. It reads it, writes it through the mutators below and learns about
//! changes made by anyone else through the listener callback.

use std::sync::Arc;

use model_tree_types::{CategoryId, Dimension, ElementSet, ModelId, SubCategoryId};
use serde::{Deserialize, Serialize};

/// Kind of view the viewport is showing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViewType {
    Spatial,
    Drawing,
}

impl ViewType {
    pub fn supports(self, dimension: Dimension) -> bool {
        matches!(
            (self, dimension),
            (ViewType::Spatial, Dimension::Spatial3d) | (ViewType::Drawing, Dimension::Drawing2d)
        )
    }
}

/// Per-(model, category) display override.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CategoryOverride {
    #[default]
    None,
    Show,
    Hide,
}

/// Raw change notifications raised by a viewport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ViewportEvent {
    ModelDisplayChanged,
    CategoryDisplayChanged,
    SubCategoryDisplayChanged,
    CategoryOverridesChanged,
    AlwaysDrawnChanged,
    NeverDrawnChanged,
    DisplayStyleChanged,
}

/// Callback invoked synchronously by the viewport after each mutation.
pub type ViewportListener = Arc<dyn Fn(&ViewportEvent) + Send + Sync>;

/// Handle returned by [`Viewport::add_listener`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Read and write access to the override layers of one viewport.
///
/// Reads are synchronous snapshots. Mutators report failure through
/// `anyhow::Result` so a host backed by a remote renderer can surface errors;
/// the in-memory implementation never fails unless told to.
pub trait Viewport: Send + Sync {
    // ── View ──

    fn view_type(&self) -> ViewType;

    // ── Selectors ──

    fn views_model(&self, model_id: ModelId) -> bool;
    fn views_category(&self, category_id: CategoryId) -> bool;
    fn is_sub_category_visible(&self, sub_category_id: SubCategoryId) -> bool;
    fn category_override(&self, model_id: ModelId, category_id: CategoryId) -> CategoryOverride;

    // ── Always / never drawn ──

    fn always_drawn(&self) -> Arc<ElementSet>;
    fn never_drawn(&self) -> Arc<ElementSet>;
    fn is_always_drawn_exclusive(&self) -> bool;

    // ── Mutators ──

    fn add_viewed_models(&self, model_ids: &[ModelId]) -> anyhow::Result<()>;
    fn change_model_display(&self, model_ids: &[ModelId], on: bool) -> anyhow::Result<()>;
    fn change_category_display(
        &self,
        category_ids: &[CategoryId],
        on: bool,
        enable_all_sub_categories: bool,
    ) -> anyhow::Result<()>;
    fn change_sub_category_display(
        &self,
        sub_category_id: SubCategoryId,
        on: bool,
    ) -> anyhow::Result<()>;
    fn set_category_override(
        &self,
        model_id: ModelId,
        category_ids: &[CategoryId],
        value: CategoryOverride,
    ) -> anyhow::Result<()>;
    fn clear_category_overrides(&self, model_ids: &[ModelId]) -> anyhow::Result<()>;
    fn set_always_drawn(&self, element_ids: ElementSet, exclusive: bool) -> anyhow::Result<()>;
    fn set_never_drawn(&self, element_ids: ElementSet) -> anyhow::Result<()>;
    fn clear_always_drawn(&self) -> anyhow::Result<()>;
    fn clear_never_drawn(&self) -> anyhow::Result<()>;

    // ── Events ──

    fn add_listener(&self, listener: ViewportListener) -> ListenerId;
    fn remove_listener(&self, id: ListenerId);
}
