//! Visibility status computation.
//!
//! Walks the override layers from most to least specific:
//!
//! ```text
//! never-drawn > always-drawn > exclusive-mode implicit hide
//!             > per-model category override > category selector
//! ```
//!
//! Grouping-like targets (subjects, models, several categories or elements)
//! reduce their parts with the early-exit merge rule. Elements hosting a
//! sub-model merge in the sub-model's own status, recursively.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use model_tree_types::{
    CategoryId, ElementId, HierarchyNode, ModelId, StatusMerger, SubCategoryId, VisibilityStatus,
};
use tracing::{debug, warn};

use crate::element_sets::{ElementScope, ElementSetCache, SetKind};
use crate::error::{VisibilityError, VisibilityResult};
use crate::filtered::FilteredTree;
use crate::id_cache::{is_missing_context, IdCache};
use crate::shape::{HierarchyShape, VisibilityTarget};
use crate::viewport::{CategoryOverride, Viewport};

// ─── Reason keys ──────────────────────────────────────────────

pub mod reasons {
    pub const MODEL_NOT_DISPLAYED: &str = "model.notDisplayed";
    pub const CATEGORY_OVERRIDE_SHOW: &str = "category.displayedThroughPerModelOverride";
    pub const CATEGORY_OVERRIDE_HIDE: &str = "category.hiddenThroughPerModelOverride";
    pub const CATEGORY_SELECTOR_SHOW: &str = "category.displayedThroughCategorySelector";
    pub const CATEGORY_SELECTOR_HIDE: &str = "category.hiddenThroughCategorySelector";
    pub const SUB_CATEGORY_CATEGORY_HIDDEN: &str = "subCategory.categoryHidden";
    pub const SUB_CATEGORY_HIDDEN: &str = "subCategory.hidden";
}

#[derive(Debug, Clone, Copy)]
struct SetReasons {
    never: &'static str,
    always: &'static str,
    exclusive: &'static str,
}

const CATEGORY_SET_REASONS: SetReasons = SetReasons {
    never: "category.allElementsInNeverDrawnList",
    always: "category.allElementsInAlwaysDrawnList",
    exclusive: "category.noElementsInExclusiveAlwaysDrawnList",
};

const ELEMENT_SET_REASONS: SetReasons = SetReasons {
    never: "element.inNeverDrawnList",
    always: "element.inAlwaysDrawnList",
    exclusive: "element.notInExclusiveAlwaysDrawnList",
};

const GROUP_SET_REASONS: SetReasons = SetReasons {
    never: "elements.allInNeverDrawnList",
    always: "elements.allInAlwaysDrawnList",
    exclusive: "elements.noneInExclusiveAlwaysDrawnList",
};

// ─── Set counts ───────────────────────────────────────────────

/// How many of a scope's elements sit in each drawn set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SetCounts {
    total: usize,
    never: usize,
    /// Always-drawn elements that are not also never-drawn.
    always: usize,
}

impl SetCounts {
    /// Status of the scope given its selector-level `default`.
    ///
    /// `exclusive` is true when exclusive mode is on and the global
    /// always-drawn set is non-empty.
    fn status(
        self,
        default: VisibilityStatus,
        exclusive: bool,
        reasons: SetReasons,
    ) -> VisibilityStatus {
        if self.total == 0 {
            return default;
        }
        if self.never >= self.total {
            return VisibilityStatus::hidden().with_reason(reasons.never);
        }
        if self.always >= self.total {
            return VisibilityStatus::visible().with_reason(reasons.always);
        }
        if exclusive {
            return if self.always > 0 {
                VisibilityStatus::partial()
            } else {
                VisibilityStatus::hidden().with_reason(reasons.exclusive)
            };
        }
        if (default.is_visible() && self.never > 0) || (default.is_hidden() && self.always > 0) {
            return VisibilityStatus::partial();
        }
        default
    }
}

/// Merge `f(item)` over `items`, stopping once the result is settled.
async fn merge_each<T, F, Fut>(
    items: impl IntoIterator<Item = T>,
    mut f: F,
) -> VisibilityResult<VisibilityStatus>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = VisibilityResult<VisibilityStatus>>,
{
    let mut merger = StatusMerger::new();
    for item in items {
        merger.push(f(item).await?);
        if merger.is_settled() {
            break;
        }
    }
    Ok(merger.finish())
}

fn dedup(ids: &[ElementId]) -> Vec<ElementId> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

// ============================================================================
// COMPUTER
// ============================================================================

pub struct StatusComputer {
    viewport: Arc<dyn Viewport>,
    id_cache: Arc<dyn IdCache>,
    shape: Arc<dyn HierarchyShape>,
    filtered: Option<Arc<dyn FilteredTree>>,
    element_sets: Arc<ElementSetCache>,
    direct_lookup_limit: usize,
}

impl std::fmt::Debug for StatusComputer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusComputer")
            .field("shape", &self.shape.name())
            .field("filtered", &self.filtered.is_some())
            .field("direct_lookup_limit", &self.direct_lookup_limit)
            .finish_non_exhaustive()
    }
}

impl StatusComputer {
    pub fn new(
        viewport: Arc<dyn Viewport>,
        id_cache: Arc<dyn IdCache>,
        shape: Arc<dyn HierarchyShape>,
        filtered: Option<Arc<dyn FilteredTree>>,
        element_sets: Arc<ElementSetCache>,
        direct_lookup_limit: usize,
    ) -> Self {
        Self {
            viewport,
            id_cache,
            shape,
            filtered,
            element_sets,
            direct_lookup_limit,
        }
    }

    /// Status of `node` against the override layers as they are right now.
    ///
    /// Ids the id cache no longer knows make the node `hidden`; any other
    /// collaborator failure is returned as [`VisibilityError::Upstream`].
    pub async fn compute(&self, node: &HierarchyNode) -> VisibilityResult<VisibilityStatus> {
        if self.is_disabled(node) {
            return Ok(VisibilityStatus::disabled());
        }
        match self.resolved_status(node).await {
            Err(VisibilityError::Upstream(err)) if is_missing_context(&err) => {
                debug!(kind = node.key.kind_name(), error = %err, "Missing context, reporting hidden");
                Ok(VisibilityStatus::hidden())
            }
            other => other,
        }
    }

    async fn resolved_status(&self, node: &HierarchyNode) -> VisibilityResult<VisibilityStatus> {
        let Some(targets) = self.targets(node).await? else {
            warn!(
                kind = node.key.kind_name(),
                shape = self.shape.name(),
                "Node cannot be resolved, reporting hidden"
            );
            return Ok(VisibilityStatus::hidden());
        };
        self.targets_status(&targets).await
    }

    /// True when the view cannot show the node's dimensionality at all.
    pub fn is_disabled(&self, node: &HierarchyNode) -> bool {
        node.extended_data
            .dimension
            .is_some_and(|dimension| !self.viewport.view_type().supports(dimension))
    }

    /// Targets of `node`; filtered branches go through the filtered tree.
    pub(crate) async fn targets(
        &self,
        node: &HierarchyNode,
    ) -> VisibilityResult<Option<Vec<VisibilityTarget>>> {
        if node.is_filtered_branch() {
            if let Some(filtered) = &self.filtered {
                return Ok(Some(filtered.targets(node).await?));
            }
        }
        Ok(self.shape.resolve(node, self.id_cache.as_ref()).await?)
    }

    async fn targets_status(
        &self,
        targets: &[VisibilityTarget],
    ) -> VisibilityResult<VisibilityStatus> {
        merge_each(targets, move |target| self.target_status(target)).await
    }

    async fn target_status(&self, target: &VisibilityTarget) -> VisibilityResult<VisibilityStatus> {
        match target {
            VisibilityTarget::Subjects(subject_ids) => {
                let model_ids = self.id_cache.get_subject_model_ids(subject_ids).await?;
                merge_each(model_ids, move |model_id| self.model_status(model_id, &[])).await
            }
            VisibilityTarget::Models(model_ids) => {
                merge_each(model_ids.iter().copied(), move |model_id| {
                    self.model_status(model_id, &[])
                })
                .await
            }
            VisibilityTarget::Categories {
                model_id: Some(model_id),
                category_ids,
            } => {
                let model_id = *model_id;
                merge_each(category_ids.iter().copied(), move |category_id| {
                    self.category_status(model_id, category_id, &[])
                })
                .await
            }
            VisibilityTarget::Categories {
                model_id: None,
                category_ids,
            } => {
                merge_each(category_ids.iter().copied(), move |category_id| {
                    self.unowned_category_status(category_id)
                })
                .await
            }
            VisibilityTarget::SubCategories {
                model_id,
                category_id,
                sub_category_ids,
            } => {
                let (model_id, category_id) = (*model_id, *category_id);
                merge_each(sub_category_ids.iter().copied(), move |sub_category_id| {
                    self.sub_category_status(model_id, category_id, sub_category_id)
                })
                .await
            }
            VisibilityTarget::Elements {
                model_id,
                category_id,
                element_ids,
            } => {
                self.elements_status(*model_id, *category_id, element_ids, &[])
                    .await
            }
        }
    }

    // ─── Models ───────────────────────────────────────────────

    /// `chain` holds the models already being evaluated above this one through
    /// sub-model links; a model is never entered twice on one path.
    fn model_status<'a>(
        &'a self,
        model_id: ModelId,
        chain: &'a [ModelId],
    ) -> BoxFuture<'a, VisibilityResult<VisibilityStatus>> {
        async move {
            if !self.viewport.views_model(model_id) && self.viewport.always_drawn().is_empty() {
                return Ok(VisibilityStatus::hidden().with_reason(reasons::MODEL_NOT_DISPLAYED));
            }
            let category_ids = self.id_cache.get_model_categories(model_id).await?;
            let mut path = chain.to_vec();
            path.push(model_id);
            let path = path.as_slice();
            merge_each(category_ids, move |category_id| {
                self.category_status(model_id, category_id, path)
            })
            .await
        }
        .boxed()
    }

    // ─── Categories ───────────────────────────────────────────

    /// Selector-level status of a category under a model: the model selector,
    /// then the per-model override, then the category selector.
    pub(crate) fn category_default(
        &self,
        model_id: ModelId,
        category_id: CategoryId,
    ) -> VisibilityStatus {
        if !self.viewport.views_model(model_id) {
            return VisibilityStatus::hidden().with_reason(reasons::MODEL_NOT_DISPLAYED);
        }
        match self.viewport.category_override(model_id, category_id) {
            CategoryOverride::Show => {
                VisibilityStatus::visible().with_reason(reasons::CATEGORY_OVERRIDE_SHOW)
            }
            CategoryOverride::Hide => {
                VisibilityStatus::hidden().with_reason(reasons::CATEGORY_OVERRIDE_HIDE)
            }
            CategoryOverride::None => self.category_selector_status(category_id),
        }
    }

    fn category_selector_status(&self, category_id: CategoryId) -> VisibilityStatus {
        if self.viewport.views_category(category_id) {
            VisibilityStatus::visible().with_reason(reasons::CATEGORY_SELECTOR_SHOW)
        } else {
            VisibilityStatus::hidden().with_reason(reasons::CATEGORY_SELECTOR_HIDE)
        }
    }

    async fn category_status(
        &self,
        model_id: ModelId,
        category_id: CategoryId,
        chain: &[ModelId],
    ) -> VisibilityResult<VisibilityStatus> {
        let default = self.category_default(model_id, category_id);
        let always = self.viewport.always_drawn();
        let never = self.viewport.never_drawn();

        let own = if always.is_empty() && never.is_empty() {
            default
        } else {
            let total = self
                .id_cache
                .get_category_elements_count(model_id, category_id)
                .await?;
            let scope = ElementScope::Category {
                model_id,
                category_id,
            };
            let never_in = self.element_sets.get_elements(&scope, SetKind::Never).await?;
            let always_in = self.element_sets.get_elements(&scope, SetKind::Always).await?;
            let counts = SetCounts {
                total,
                never: never_in.len(),
                always: always_in.iter().filter(|id| !never_in.contains(*id)).count(),
            };
            counts.status(default, self.is_exclusive(), CATEGORY_SET_REASONS)
        };

        if own.is_partial() || !self.shape.considers_sub_models() {
            return Ok(own);
        }
        let modeled = self
            .id_cache
            .get_categories_modeled_elements(model_id, &[category_id])
            .await?;
        self.merge_sub_models(own, &modeled, chain).await
    }

    /// Category shown over every model that contains it.
    async fn unowned_category_status(
        &self,
        category_id: CategoryId,
    ) -> VisibilityResult<VisibilityStatus> {
        let model_ids = self.id_cache.get_category_model_ids(category_id).await?;
        if model_ids.is_empty() {
            return Ok(self.category_selector_status(category_id));
        }
        merge_each(model_ids, move |model_id| {
            self.category_status(model_id, category_id, &[])
        })
        .await
    }

    async fn sub_category_status(
        &self,
        model_id: ModelId,
        category_id: CategoryId,
        sub_category_id: SubCategoryId,
    ) -> VisibilityResult<VisibilityStatus> {
        let category = self.category_status(model_id, category_id, &[]).await?;
        if category.is_hidden() {
            return Ok(VisibilityStatus::hidden().with_reason(reasons::SUB_CATEGORY_CATEGORY_HIDDEN));
        }
        if self.viewport.is_sub_category_visible(sub_category_id) {
            Ok(VisibilityStatus::visible())
        } else {
            Ok(VisibilityStatus::hidden().with_reason(reasons::SUB_CATEGORY_HIDDEN))
        }
    }

    // ─── Elements ─────────────────────────────────────────────

    async fn elements_status(
        &self,
        model_id: ModelId,
        category_id: CategoryId,
        element_ids: &[ElementId],
        chain: &[ModelId],
    ) -> VisibilityResult<VisibilityStatus> {
        let element_ids = dedup(element_ids);
        if element_ids.is_empty() {
            return Ok(VisibilityStatus::visible());
        }
        let default = self.category_default(model_id, category_id);
        let always = self.viewport.always_drawn();
        let never = self.viewport.never_drawn();

        let own = if always.is_empty() && never.is_empty() {
            default
        } else {
            let counts = if element_ids.len() <= self.direct_lookup_limit {
                SetCounts {
                    total: element_ids.len(),
                    never: element_ids.iter().filter(|id| never.contains(*id)).count(),
                    always: element_ids
                        .iter()
                        .filter(|id| always.contains(*id) && !never.contains(*id))
                        .count(),
                }
            } else {
                let scope = ElementScope::Elements(element_ids.clone());
                let never_in = self.element_sets.get_elements(&scope, SetKind::Never).await?;
                let always_in = self.element_sets.get_elements(&scope, SetKind::Always).await?;
                SetCounts {
                    total: element_ids.len(),
                    never: never_in.len(),
                    always: always_in.iter().filter(|id| !never_in.contains(*id)).count(),
                }
            };
            let reasons = if element_ids.len() == 1 {
                ELEMENT_SET_REASONS
            } else {
                GROUP_SET_REASONS
            };
            counts.status(default, self.is_exclusive(), reasons)
        };

        if own.is_partial() || !self.shape.considers_sub_models() {
            return Ok(own);
        }
        let modeled = if let [element_id] = element_ids.as_slice() {
            vec![*element_id]
        } else {
            let group: std::collections::HashSet<ElementId> = element_ids.iter().copied().collect();
            self.id_cache
                .get_categories_modeled_elements(model_id, &[category_id])
                .await?
                .into_iter()
                .filter(|id| group.contains(id))
                .collect()
        };
        self.merge_sub_models(own, &modeled, chain).await
    }

    /// Merge the status of every sub-model hosted by `modeled` into `own`.
    async fn merge_sub_models(
        &self,
        mut own: VisibilityStatus,
        modeled: &[ElementId],
        chain: &[ModelId],
    ) -> VisibilityResult<VisibilityStatus> {
        for element_id in modeled {
            if own.is_partial() {
                break;
            }
            let Some(sub_model_id) = self.id_cache.get_sub_model(*element_id).await? else {
                continue;
            };
            if chain.contains(&sub_model_id) {
                continue;
            }
            let sub_model = self.model_status(sub_model_id, chain).await?;
            own = own.merge(sub_model);
        }
        Ok(own)
    }

    fn is_exclusive(&self) -> bool {
        self.viewport.is_always_drawn_exclusive() && !self.viewport.always_drawn().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coalescer::EventCoalescer;
    use crate::memory::{MemoryIdCache, MemoryViewport};
    use crate::shape::{ClassificationsTreeShape, ModelsTreeShape};
    use model_tree_types::{Dimension, ElementSet, Id64, VisibilityState};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    struct Fixture {
        viewport: Arc<MemoryViewport>,
        id_cache: Arc<MemoryIdCache>,
        computer: StatusComputer,
    }

    /// Model 1 with categories 10 (elements 100..105) and 20 (elements 200..205).
    fn fixture_with(shape: Arc<dyn HierarchyShape>) -> Fixture {
        let viewport = Arc::new(MemoryViewport::spatial([Id64(1)], [Id64(10), Id64(20)]));
        let id_cache = Arc::new(MemoryIdCache::new());
        id_cache.add_elements(Id64(1), Id64(10), Id64(100), 5);
        id_cache.add_elements(Id64(1), Id64(20), Id64(200), 5);
        let coalescer = EventCoalescer::spawn(Duration::ZERO);
        let listener = coalescer.clone();
        viewport.add_listener(Arc::new(move |event| listener.handle_event(event)));
        let element_sets = Arc::new(ElementSetCache::new(
            viewport.clone(),
            id_cache.clone(),
            coalescer,
        ));
        let computer = StatusComputer::new(
            viewport.clone(),
            id_cache.clone(),
            shape,
            None,
            element_sets,
            2,
        );
        Fixture {
            viewport,
            id_cache,
            computer,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(ModelsTreeShape))
    }

    fn set(ids: &[u64]) -> ElementSet {
        ids.iter().map(|id| Id64(*id)).collect()
    }

    async fn state(f: &Fixture, node: &HierarchyNode) -> VisibilityState {
        f.computer.compute(node).await.unwrap().state
    }

    #[test]
    fn test_set_counts_rules() {
        let visible = VisibilityStatus::visible();
        let hidden = VisibilityStatus::hidden();
        let counts = |never, always| SetCounts {
            total: 4,
            never,
            always,
        };
        let r = CATEGORY_SET_REASONS;
        assert!(counts(4, 0).status(visible.clone(), false, r).is_hidden());
        assert!(counts(0, 4).status(hidden.clone(), false, r).is_visible());
        assert!(counts(1, 0).status(visible.clone(), false, r).is_partial());
        assert!(counts(1, 0).status(hidden.clone(), false, r).is_hidden());
        assert!(counts(0, 1).status(hidden.clone(), false, r).is_partial());
        assert!(counts(0, 1).status(visible.clone(), true, r).is_partial());
        assert!(counts(0, 0).status(visible.clone(), true, r).is_hidden());
        let empty = SetCounts {
            total: 0,
            never: 0,
            always: 0,
        };
        assert_eq!(empty.status(hidden.clone(), true, r), hidden);
    }

    #[tokio::test]
    async fn test_category_default_only() {
        let f = fixture();
        let status = f
            .computer
            .compute(&HierarchyNode::category(Id64(1), vec![Id64(10)]))
            .await
            .unwrap();
        assert_eq!(
            status,
            VisibilityStatus::visible().with_reason(reasons::CATEGORY_SELECTOR_SHOW)
        );
        assert_eq!(state(&f, &HierarchyNode::model(vec![Id64(1)])).await, VisibilityState::Visible);
    }

    #[tokio::test]
    async fn test_per_model_override_beats_selector() {
        let f = fixture();
        f.viewport
            .change_category_display(&[Id64(20)], false, false)
            .unwrap();
        f.viewport
            .set_category_override(Id64(1), &[Id64(20)], CategoryOverride::Show)
            .unwrap();
        let node = HierarchyNode::category(Id64(1), vec![Id64(20)]);
        assert_eq!(state(&f, &node).await, VisibilityState::Visible);
    }

    #[tokio::test]
    async fn test_conflicting_sibling_overrides_make_model_partial() {
        let f = fixture();
        f.viewport
            .set_category_override(Id64(1), &[Id64(10)], CategoryOverride::Show)
            .unwrap();
        f.viewport
            .set_category_override(Id64(1), &[Id64(20)], CategoryOverride::Hide)
            .unwrap();
        assert_eq!(
            state(&f, &HierarchyNode::model(vec![Id64(1)])).await,
            VisibilityState::Partial
        );
    }

    #[tokio::test]
    async fn test_exclusive_mode() {
        let f = fixture();
        f.viewport.set_always_drawn(set(&[100]), true).unwrap();

        let e1 = HierarchyNode::element(Id64(1), Id64(10), vec![Id64(100)]);
        let e2 = HierarchyNode::element(Id64(1), Id64(10), vec![Id64(101)]);
        let category = HierarchyNode::category(Id64(1), vec![Id64(10)]);
        let other = HierarchyNode::category(Id64(1), vec![Id64(20)]);

        assert_eq!(state(&f, &e1).await, VisibilityState::Visible);
        let e2_status = f.computer.compute(&e2).await.unwrap();
        assert_eq!(
            e2_status,
            VisibilityStatus::hidden().with_reason("element.notInExclusiveAlwaysDrawnList")
        );
        assert_eq!(state(&f, &category).await, VisibilityState::Partial);
        assert_eq!(state(&f, &other).await, VisibilityState::Hidden);
    }

    #[tokio::test]
    async fn test_never_drawn_wins_over_always_drawn() {
        let f = fixture();
        f.viewport.set_always_drawn(set(&[100]), false).unwrap();
        f.viewport.set_never_drawn(set(&[100])).unwrap();
        let node = HierarchyNode::element(Id64(1), Id64(10), vec![Id64(100)]);
        assert_eq!(
            f.computer.compute(&node).await.unwrap(),
            VisibilityStatus::hidden().with_reason("element.inNeverDrawnList")
        );
    }

    #[tokio::test]
    async fn test_always_drawn_element_in_hidden_category() {
        let f = fixture();
        f.viewport
            .change_category_display(&[Id64(10)], false, false)
            .unwrap();
        f.viewport.set_always_drawn(set(&[100]), false).unwrap();
        let element = HierarchyNode::element(Id64(1), Id64(10), vec![Id64(100)]);
        let category = HierarchyNode::category(Id64(1), vec![Id64(10)]);
        assert_eq!(state(&f, &element).await, VisibilityState::Visible);
        assert_eq!(state(&f, &category).await, VisibilityState::Partial);
    }

    #[tokio::test]
    async fn test_grouping_node_goes_through_cache_above_limit() {
        let f = fixture();
        f.viewport.set_never_drawn(set(&[100, 101, 102])).unwrap();
        let ids: Vec<ElementId> = (100..103).map(Id64).collect();
        let group = HierarchyNode::class_grouping(Id64(1), Id64(10), "Wall", ids);
        assert_eq!(
            f.computer.compute(&group).await.unwrap(),
            VisibilityStatus::hidden().with_reason("elements.allInNeverDrawnList")
        );

        let mixed = HierarchyNode::class_grouping(Id64(1), Id64(10), "Wall", vec![
            Id64(102),
            Id64(103),
            Id64(104),
        ]);
        assert_eq!(state(&f, &mixed).await, VisibilityState::Partial);
    }

    #[tokio::test]
    async fn test_sub_model_makes_element_partial() {
        let f = fixture();
        f.id_cache.add_sub_model(Id64(100), Id64(2));
        let element = HierarchyNode::element(Id64(1), Id64(10), vec![Id64(100)]);
        assert_eq!(state(&f, &element).await, VisibilityState::Partial);
        assert_eq!(
            state(&f, &HierarchyNode::category(Id64(1), vec![Id64(10)])).await,
            VisibilityState::Partial
        );

        f.viewport.add_viewed_models(&[Id64(2)]).unwrap();
        assert_eq!(state(&f, &element).await, VisibilityState::Visible);
    }

    #[tokio::test]
    async fn test_sub_model_cycle_terminates() {
        let f = fixture();
        f.id_cache.add_sub_model(Id64(100), Id64(1));
        assert_eq!(
            state(&f, &HierarchyNode::model(vec![Id64(1)])).await,
            VisibilityState::Visible
        );
    }

    #[tokio::test]
    async fn test_classifications_shape_ignores_sub_models() {
        let f = fixture_with(Arc::new(ClassificationsTreeShape));
        f.id_cache.add_sub_model(Id64(100), Id64(2));
        let element = HierarchyNode::element(Id64(1), Id64(10), vec![Id64(100)]);
        assert_eq!(state(&f, &element).await, VisibilityState::Visible);
    }

    #[tokio::test]
    async fn test_unowned_category_merges_over_models() {
        let f = fixture_with(Arc::new(ClassificationsTreeShape));
        f.id_cache.add_element(Id64(2), Id64(10), Id64(900));
        let node = HierarchyNode::new(model_tree_types::NodeKey::Category {
            ids: vec![Id64(10)],
        });
        assert_eq!(state(&f, &node).await, VisibilityState::Partial);

        f.viewport.add_viewed_models(&[Id64(2)]).unwrap();
        assert_eq!(state(&f, &node).await, VisibilityState::Visible);
    }

    #[tokio::test]
    async fn test_sub_category_follows_category() {
        let f = fixture();
        let node = HierarchyNode::sub_category(Id64(1), Id64(10), vec![Id64(11)]);
        assert_eq!(state(&f, &node).await, VisibilityState::Visible);
        f.viewport.change_sub_category_display(Id64(11), false).unwrap();
        assert_eq!(state(&f, &node).await, VisibilityState::Hidden);
        f.viewport.change_sub_category_display(Id64(11), true).unwrap();
        f.viewport
            .change_category_display(&[Id64(10)], false, false)
            .unwrap();
        assert_eq!(
            f.computer.compute(&node).await.unwrap(),
            VisibilityStatus::hidden().with_reason(reasons::SUB_CATEGORY_CATEGORY_HIDDEN)
        );
    }

    #[tokio::test]
    async fn test_disabled_guard_comes_first() {
        let f = fixture();
        let node = HierarchyNode::model(vec![Id64(1)]).with_dimension(Dimension::Drawing2d);
        assert_eq!(state(&f, &node).await, VisibilityState::Disabled);
    }

    #[tokio::test]
    async fn test_missing_context_is_hidden() {
        let f = fixture();
        f.viewport.add_viewed_models(&[Id64(9)]).unwrap();
        let status = f
            .computer
            .compute(&HierarchyNode::model(vec![Id64(9)]))
            .await
            .unwrap();
        assert_eq!(status, VisibilityStatus::hidden());
    }

    #[tokio::test]
    async fn test_unresolvable_node_is_hidden() {
        let f = fixture();
        let node = HierarchyNode::classification(vec![Id64(3)]);
        assert_eq!(state(&f, &node).await, VisibilityState::Hidden);
    }

    #[tokio::test]
    async fn test_upstream_failure_propagates() {
        let f = fixture();
        f.id_cache.set_failing(true);
        let err = f
            .computer
            .compute(&HierarchyNode::model(vec![Id64(1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, VisibilityError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_empty_model_is_vacuously_visible() {
        let f = fixture();
        f.id_cache.add_model(Id64(3));
        f.viewport.add_viewed_models(&[Id64(3)]).unwrap();
        assert_eq!(
            state(&f, &HierarchyNode::model(vec![Id64(3)])).await,
            VisibilityState::Visible
        );
    }
}
