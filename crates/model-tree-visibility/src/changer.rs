//! Turning nodes on and off.
//!
//! A change is planned first, against the override layers as they are when
//! the request starts, into a list of [`ViewportOp`]s. The plan is then
//! applied in order: selector and override writes go straight to the
//! viewport, element-level work goes through the change queue.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use model_tree_types::{CategoryId, ElementId, ModelId, SubCategoryId};
use tracing::debug;

use crate::computer::StatusComputer;
use crate::element_sets::{ElementScope, ElementSetCache, SetKind};
use crate::error::VisibilityResult;
use crate::id_cache::{is_missing_context, IdCache};
use crate::queue::{ChangeQueue, QueueJob};
use crate::shape::VisibilityTarget;
use crate::viewport::{CategoryOverride, Viewport};

/// One step of a planned change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewportOp {
    AddViewedModels(Vec<ModelId>),
    ChangeModelDisplay {
        model_ids: Vec<ModelId>,
        on: bool,
    },
    ChangeCategoryDisplay {
        category_ids: Vec<CategoryId>,
        on: bool,
        enable_all_sub_categories: bool,
    },
    ChangeSubCategoryDisplay {
        sub_category_id: SubCategoryId,
        on: bool,
    },
    SetCategoryOverride {
        model_id: ModelId,
        category_ids: Vec<CategoryId>,
        value: CategoryOverride,
    },
    ClearCategoryOverrides(Vec<ModelId>),
    Queue(QueueJob),
}

/// Run `ops` in order. Queued jobs are awaited before the next op starts.
pub async fn apply_ops(
    ops: Vec<ViewportOp>,
    viewport: &dyn Viewport,
    queue: &ChangeQueue,
) -> VisibilityResult<()> {
    for op in ops {
        match op {
            ViewportOp::AddViewedModels(model_ids) => viewport.add_viewed_models(&model_ids)?,
            ViewportOp::ChangeModelDisplay { model_ids, on } => {
                viewport.change_model_display(&model_ids, on)?
            }
            ViewportOp::ChangeCategoryDisplay {
                category_ids,
                on,
                enable_all_sub_categories,
            } => viewport.change_category_display(&category_ids, on, enable_all_sub_categories)?,
            ViewportOp::ChangeSubCategoryDisplay {
                sub_category_id,
                on,
            } => viewport.change_sub_category_display(sub_category_id, on)?,
            ViewportOp::SetCategoryOverride {
                model_id,
                category_ids,
                value,
            } => viewport.set_category_override(model_id, &category_ids, value)?,
            ViewportOp::ClearCategoryOverrides(model_ids) => {
                viewport.clear_category_overrides(&model_ids)?
            }
            ViewportOp::Queue(job) => queue.enqueue(job).await?.wait().await?,
        }
    }
    Ok(())
}

/// Lookups made while planning treat unknown ids as "nothing there".
fn lenient<T: Default>(result: anyhow::Result<T>) -> anyhow::Result<T> {
    match result {
        Err(err) if is_missing_context(&err) => {
            debug!(error = %err, "Skipping unresolved ids while planning");
            Ok(T::default())
        }
        other => other,
    }
}

pub(crate) struct ChangePlanner<'a> {
    viewport: &'a dyn Viewport,
    id_cache: &'a dyn IdCache,
    computer: &'a StatusComputer,
    element_sets: &'a ElementSetCache,
    considers_sub_models: bool,
    ops: Vec<ViewportOp>,
}

impl<'a> ChangePlanner<'a> {
    pub(crate) fn new(
        viewport: &'a dyn Viewport,
        id_cache: &'a dyn IdCache,
        computer: &'a StatusComputer,
        element_sets: &'a ElementSetCache,
        considers_sub_models: bool,
    ) -> Self {
        Self {
            viewport,
            id_cache,
            computer,
            element_sets,
            considers_sub_models,
            ops: Vec::new(),
        }
    }

    pub(crate) async fn plan(
        mut self,
        targets: &[VisibilityTarget],
        on: bool,
    ) -> VisibilityResult<Vec<ViewportOp>> {
        for target in targets {
            match target {
                VisibilityTarget::Subjects(subject_ids) => {
                    let model_ids =
                        lenient(self.id_cache.get_subject_model_ids(subject_ids).await)?;
                    self.models(model_ids, on).await?;
                }
                VisibilityTarget::Models(model_ids) => self.models(model_ids.clone(), on).await?,
                VisibilityTarget::Categories {
                    model_id: Some(model_id),
                    category_ids,
                } => self.categories(*model_id, category_ids, on).await?,
                VisibilityTarget::Categories {
                    model_id: None,
                    category_ids,
                } => self.unowned_categories(category_ids, on).await?,
                VisibilityTarget::SubCategories {
                    model_id,
                    category_id,
                    sub_category_ids,
                } => {
                    for sub_category_id in sub_category_ids {
                        self.ops.push(ViewportOp::ChangeSubCategoryDisplay {
                            sub_category_id: *sub_category_id,
                            on,
                        });
                    }
                    if on {
                        self.categories(*model_id, &[*category_id], on).await?;
                    }
                }
                VisibilityTarget::Elements {
                    model_id,
                    category_id,
                    element_ids,
                } => {
                    self.elements(*model_id, *category_id, element_ids, on)
                        .await?
                }
            }
        }
        Ok(self.ops)
    }

    // ─── Models ───────────────────────────────────────────────

    /// Show or hide models together with every sub-model reachable from them.
    async fn models(&mut self, model_ids: Vec<ModelId>, on: bool) -> VisibilityResult<()> {
        let mut pending: VecDeque<ModelId> = model_ids.into();
        let mut seen = HashSet::new();
        let mut affected: Vec<(ModelId, Vec<CategoryId>)> = Vec::new();
        while let Some(model_id) = pending.pop_front() {
            if !seen.insert(model_id) {
                continue;
            }
            let category_ids = if on || self.considers_sub_models {
                lenient(self.id_cache.get_model_categories(model_id).await)?
            } else {
                Vec::new()
            };
            if self.considers_sub_models && !category_ids.is_empty() {
                pending.extend(self.sub_models(model_id, &category_ids, None).await?);
            }
            affected.push((model_id, category_ids));
        }
        if affected.is_empty() {
            return Ok(());
        }

        let model_ids: Vec<ModelId> = affected.iter().map(|(model_id, _)| *model_id).collect();
        if on {
            self.ops
                .push(ViewportOp::ClearCategoryOverrides(model_ids.clone()));
            self.ops.push(ViewportOp::AddViewedModels(model_ids.clone()));
            for (model_id, category_ids) in &affected {
                let hidden: Vec<CategoryId> = category_ids
                    .iter()
                    .copied()
                    .filter(|category_id| !self.viewport.views_category(*category_id))
                    .collect();
                if !hidden.is_empty() {
                    self.ops.push(ViewportOp::SetCategoryOverride {
                        model_id: *model_id,
                        category_ids: hidden,
                        value: CategoryOverride::Show,
                    });
                }
            }
        } else {
            self.ops.push(ViewportOp::ChangeModelDisplay {
                model_ids: model_ids.clone(),
                on: false,
            });
        }
        self.forget(model_ids.into_iter().map(ElementScope::Model).collect())
            .await
    }

    /// Add a model to the view with all of its categories hidden except `keep`.
    async fn show_model_without_categories(
        &mut self,
        model_id: ModelId,
        keep: &[CategoryId],
    ) -> VisibilityResult<()> {
        let others: Vec<CategoryId> = lenient(self.id_cache.get_model_categories(model_id).await)?
            .into_iter()
            .filter(|category_id| !keep.contains(category_id))
            .collect();
        self.ops
            .push(ViewportOp::ClearCategoryOverrides(vec![model_id]));
        self.ops.push(ViewportOp::AddViewedModels(vec![model_id]));
        if !others.is_empty() {
            self.ops.push(ViewportOp::SetCategoryOverride {
                model_id,
                category_ids: others,
                value: CategoryOverride::Hide,
            });
        }
        Ok(())
    }

    // ─── Categories ───────────────────────────────────────────

    async fn categories(
        &mut self,
        model_id: ModelId,
        category_ids: &[CategoryId],
        on: bool,
    ) -> VisibilityResult<()> {
        if on && !self.viewport.views_model(model_id) {
            self.show_model_without_categories(model_id, category_ids)
                .await?;
        }

        let mut by_value: BTreeMap<u8, (CategoryOverride, Vec<CategoryId>)> = BTreeMap::new();
        for category_id in category_ids {
            let value = if self.viewport.views_category(*category_id) == on {
                CategoryOverride::None
            } else if on {
                CategoryOverride::Show
            } else {
                CategoryOverride::Hide
            };
            by_value
                .entry(value as u8)
                .or_insert_with(|| (value, Vec::new()))
                .1
                .push(*category_id);
        }
        for (value, category_ids) in by_value.into_values() {
            self.ops.push(ViewportOp::SetCategoryOverride {
                model_id,
                category_ids,
                value,
            });
        }

        self.forget(category_scopes(model_id, category_ids)).await?;

        if self.considers_sub_models {
            let sub_models = self.sub_models(model_id, category_ids, None).await?;
            self.models(sub_models, on).await?;
        }
        Ok(())
    }

    /// Categories shown over every model containing them.
    async fn unowned_categories(
        &mut self,
        category_ids: &[CategoryId],
        on: bool,
    ) -> VisibilityResult<()> {
        self.ops.push(ViewportOp::ChangeCategoryDisplay {
            category_ids: category_ids.to_vec(),
            on,
            enable_all_sub_categories: on,
        });

        let mut by_model: BTreeMap<ModelId, Vec<CategoryId>> = BTreeMap::new();
        for category_id in category_ids {
            for model_id in lenient(self.id_cache.get_category_model_ids(*category_id).await)? {
                by_model.entry(model_id).or_default().push(*category_id);
            }
        }
        for (model_id, model_categories) in by_model {
            if on && !self.viewport.views_model(model_id) {
                self.show_model_without_categories(model_id, &model_categories)
                    .await?;
            }
            self.ops.push(ViewportOp::SetCategoryOverride {
                model_id,
                category_ids: model_categories.clone(),
                value: CategoryOverride::None,
            });
            self.forget(category_scopes(model_id, &model_categories))
                .await?;
        }
        Ok(())
    }

    // ─── Elements ─────────────────────────────────────────────

    async fn elements(
        &mut self,
        model_id: ModelId,
        category_id: CategoryId,
        element_ids: &[ElementId],
        on: bool,
    ) -> VisibilityResult<()> {
        if element_ids.is_empty() {
            return Ok(());
        }
        let visible_by_default = if on && !self.viewport.views_model(model_id) {
            self.show_model_without_categories(model_id, &[]).await?;
            false
        } else {
            self.computer
                .category_default(model_id, category_id)
                .is_visible()
        };
        self.ops.push(ViewportOp::Queue(QueueJob::Elements {
            element_ids: element_ids.to_vec(),
            on,
            visible_by_default,
        }));

        if self.considers_sub_models {
            let sub_models = if let [element_id] = element_ids {
                lenient(self.id_cache.get_sub_model(*element_id).await)?
                    .into_iter()
                    .collect()
            } else {
                let group: HashSet<ElementId> = element_ids.iter().copied().collect();
                self.sub_models(model_id, &[category_id], Some(&group))
                    .await?
            };
            self.models(sub_models, on).await?;
        }
        Ok(())
    }

    // ─── Helpers ──────────────────────────────────────────────

    /// Sub-models hosted by elements of the given categories, optionally
    /// restricted to `only`.
    async fn sub_models(
        &self,
        model_id: ModelId,
        category_ids: &[CategoryId],
        only: Option<&HashSet<ElementId>>,
    ) -> VisibilityResult<Vec<ModelId>> {
        let modeled = lenient(
            self.id_cache
                .get_categories_modeled_elements(model_id, category_ids)
                .await,
        )?;
        let mut sub_models = Vec::new();
        for element_id in modeled {
            if only.is_some_and(|only| !only.contains(&element_id)) {
                continue;
            }
            if let Some(sub_model_id) = lenient(self.id_cache.get_sub_model(element_id).await)? {
                sub_models.push(sub_model_id);
            }
        }
        Ok(sub_models)
    }

    /// Queue removal of every always/never-drawn entry inside `scopes`.
    async fn forget(&mut self, scopes: Vec<ElementScope>) -> VisibilityResult<()> {
        if self.viewport.always_drawn().is_empty() && self.viewport.never_drawn().is_empty() {
            return Ok(());
        }
        let mut element_ids = BTreeSet::new();
        for scope in scopes {
            for kind in [SetKind::Always, SetKind::Never] {
                let found = self.element_sets.get_elements(&scope, kind).await?;
                element_ids.extend(found.iter().copied());
            }
        }
        if !element_ids.is_empty() {
            self.ops.push(ViewportOp::Queue(QueueJob::Forget {
                element_ids: element_ids.into_iter().collect(),
            }));
        }
        Ok(())
    }
}

fn category_scopes(model_id: ModelId, category_ids: &[CategoryId]) -> Vec<ElementScope> {
    category_ids
        .iter()
        .map(|category_id| ElementScope::Category {
            model_id,
            category_id: *category_id,
        })
        .collect()
}
