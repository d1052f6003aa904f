//! Bulk model conveniences for tree toolbars.

use std::collections::BTreeSet;

use model_tree_types::{CategoryId, ModelId};
use tracing::info;

use crate::changer::ViewportOp;
use crate::engine::VisibilityEngine;
use crate::error::VisibilityResult;
use crate::id_cache::is_missing_context;
use crate::queue::QueueJob;

/// Show the given models with every category and sub-category on, and drop
/// all always/never-drawn entries.
pub async fn show_all_models(engine: &VisibilityEngine, model_ids: &[ModelId]) -> VisibilityResult<()> {
    let mut category_ids: BTreeSet<CategoryId> = BTreeSet::new();
    for model_id in model_ids {
        match engine.id_cache().get_model_categories(*model_id).await {
            Ok(categories) => category_ids.extend(categories),
            Err(err) if is_missing_context(&err) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    info!(models = model_ids.len(), categories = category_ids.len(), "Showing all models");
    engine
        .apply_plan(vec![
            ViewportOp::ClearCategoryOverrides(model_ids.to_vec()),
            ViewportOp::AddViewedModels(model_ids.to_vec()),
            ViewportOp::ChangeCategoryDisplay {
                category_ids: category_ids.into_iter().collect(),
                on: true,
                enable_all_sub_categories: true,
            },
            ViewportOp::Queue(QueueJob::ClearAll),
        ])
        .await
}

pub async fn hide_all_models(engine: &VisibilityEngine, model_ids: &[ModelId]) -> VisibilityResult<()> {
    info!(models = model_ids.len(), "Hiding all models");
    engine
        .apply_plan(vec![ViewportOp::ChangeModelDisplay {
            model_ids: model_ids.to_vec(),
            on: false,
        }])
        .await
}

/// Show the hidden ones among `model_ids` and hide the shown ones.
pub async fn invert_all_models(engine: &VisibilityEngine, model_ids: &[ModelId]) -> VisibilityResult<()> {
    let viewport = engine.viewport();
    let (shown, hidden): (Vec<ModelId>, Vec<ModelId>) = model_ids
        .iter()
        .copied()
        .partition(|model_id| viewport.views_model(*model_id));
    let mut ops = Vec::new();
    if !hidden.is_empty() {
        ops.push(ViewportOp::AddViewedModels(hidden));
    }
    if !shown.is_empty() {
        ops.push(ViewportOp::ChangeModelDisplay {
            model_ids: shown,
            on: false,
        });
    }
    engine.apply_plan(ops).await
}

/// Toolbar toggle: hide the models when they are currently enabled,
/// otherwise show them all.
pub async fn toggle_models(
    engine: &VisibilityEngine,
    model_ids: &[ModelId],
    currently_enabled: bool,
) -> VisibilityResult<()> {
    if currently_enabled {
        hide_all_models(engine, model_ids).await
    } else {
        show_all_models(engine, model_ids).await
    }
}

/// True when there is at least one model and the view shows all of them.
pub fn are_all_models_visible(engine: &VisibilityEngine, model_ids: &[ModelId]) -> bool {
    !model_ids.is_empty()
        && model_ids
            .iter()
            .all(|model_id| engine.viewport().views_model(*model_id))
}
