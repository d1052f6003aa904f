//! In-memory collaborators.
//!
//! `MemoryViewport` and `MemoryIdCache` back the engine in tests and in hosts
//! that keep their hierarchy data in process. Both can inject latency or
//! failures so suspension and error paths can be exercised deterministically.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use model_tree_types::{
    CategoryId, ClassificationId, ClassificationTableId, ElementId, ElementSet, ModelId,
    SubCategoryId, SubjectId,
};

use crate::id_cache::{ElementInfo, IdCache, LookupError};
use crate::viewport::{
    CategoryOverride, ListenerId, Viewport, ViewportEvent, ViewportListener, ViewType,
};

// ============================================================================
// VIEWPORT
// ============================================================================

#[derive(Debug)]
struct ViewportState {
    view_type: ViewType,
    viewed_models: HashSet<ModelId>,
    viewed_categories: HashSet<CategoryId>,
    hidden_sub_categories: HashSet<SubCategoryId>,
    sub_categories: HashMap<CategoryId, Vec<SubCategoryId>>,
    overrides: HashMap<(ModelId, CategoryId), CategoryOverride>,
    always_drawn: Arc<ElementSet>,
    never_drawn: Arc<ElementSet>,
    exclusive: bool,
}

/// Viewport whose override layers live in process memory.
///
/// Listeners are called synchronously after every mutator, outside the state
/// lock, so a listener may read the viewport again.
pub struct MemoryViewport {
    state: RwLock<ViewportState>,
    listeners: Mutex<Vec<(ListenerId, ViewportListener)>>,
    next_listener: AtomicU64,
    passing_writes: AtomicUsize,
    failing_writes: AtomicUsize,
    drawn_set_writes: AtomicUsize,
}

impl std::fmt::Debug for MemoryViewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryViewport")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl MemoryViewport {
    pub fn new(view_type: ViewType) -> Self {
        Self {
            state: RwLock::new(ViewportState {
                view_type,
                viewed_models: HashSet::new(),
                viewed_categories: HashSet::new(),
                hidden_sub_categories: HashSet::new(),
                sub_categories: HashMap::new(),
                overrides: HashMap::new(),
                always_drawn: Arc::new(ElementSet::new()),
                never_drawn: Arc::new(ElementSet::new()),
                exclusive: false,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            passing_writes: AtomicUsize::new(0),
            failing_writes: AtomicUsize::new(0),
            drawn_set_writes: AtomicUsize::new(0),
        }
    }

    /// Spatial viewport that already displays the given models and categories.
    pub fn spatial(
        models: impl IntoIterator<Item = ModelId>,
        categories: impl IntoIterator<Item = CategoryId>,
    ) -> Self {
        let viewport = Self::new(ViewType::Spatial);
        {
            let mut state = viewport.write_state();
            state.viewed_models.extend(models);
            state.viewed_categories.extend(categories);
        }
        viewport
    }

    /// Register the sub-categories of a category (used by "enable all sub-categories").
    pub fn with_sub_categories(
        self,
        category_id: CategoryId,
        sub_category_ids: impl IntoIterator<Item = SubCategoryId>,
    ) -> Self {
        self.write_state()
            .sub_categories
            .entry(category_id)
            .or_default()
            .extend(sub_category_ids);
        self
    }

    /// Make the next `count` mutator calls fail.
    pub fn fail_next_writes(&self, count: usize) {
        self.fail_writes_after(0, count);
    }

    /// Let `passing` mutator calls through, then fail the next `count`.
    pub fn fail_writes_after(&self, passing: usize, count: usize) {
        self.passing_writes.store(passing, Ordering::SeqCst);
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of `set_always_drawn` / `set_never_drawn` commits so far.
    pub fn drawn_set_writes(&self) -> usize {
        self.drawn_set_writes.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, ViewportState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, ViewportState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_write(&self) -> anyhow::Result<()> {
        let passed = self
            .passing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if passed {
            return Ok(());
        }
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            bail!("injected viewport write failure");
        }
        Ok(())
    }

    /// Apply `update` under the write lock, then notify listeners.
    fn mutate(
        &self,
        event: ViewportEvent,
        update: impl FnOnce(&mut ViewportState),
    ) -> anyhow::Result<()> {
        self.check_write()?;
        update(&mut self.write_state());
        self.emit(&event);
        Ok(())
    }

    fn emit(&self, event: &ViewportEvent) {
        let listeners: Vec<ViewportListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl Viewport for MemoryViewport {
    fn view_type(&self) -> ViewType {
        self.read_state().view_type
    }

    fn views_model(&self, model_id: ModelId) -> bool {
        self.read_state().viewed_models.contains(&model_id)
    }

    fn views_category(&self, category_id: CategoryId) -> bool {
        self.read_state().viewed_categories.contains(&category_id)
    }

    fn is_sub_category_visible(&self, sub_category_id: SubCategoryId) -> bool {
        !self
            .read_state()
            .hidden_sub_categories
            .contains(&sub_category_id)
    }

    fn category_override(&self, model_id: ModelId, category_id: CategoryId) -> CategoryOverride {
        self.read_state()
            .overrides
            .get(&(model_id, category_id))
            .copied()
            .unwrap_or_default()
    }

    fn always_drawn(&self) -> Arc<ElementSet> {
        self.read_state().always_drawn.clone()
    }

    fn never_drawn(&self) -> Arc<ElementSet> {
        self.read_state().never_drawn.clone()
    }

    fn is_always_drawn_exclusive(&self) -> bool {
        self.read_state().exclusive
    }

    fn add_viewed_models(&self, model_ids: &[ModelId]) -> anyhow::Result<()> {
        self.mutate(ViewportEvent::ModelDisplayChanged, |state| {
            state.viewed_models.extend(model_ids.iter().copied());
        })
    }

    fn change_model_display(&self, model_ids: &[ModelId], on: bool) -> anyhow::Result<()> {
        self.mutate(ViewportEvent::ModelDisplayChanged, |state| {
            for id in model_ids {
                if on {
                    state.viewed_models.insert(*id);
                } else {
                    state.viewed_models.remove(id);
                }
            }
        })
    }

    fn change_category_display(
        &self,
        category_ids: &[CategoryId],
        on: bool,
        enable_all_sub_categories: bool,
    ) -> anyhow::Result<()> {
        self.mutate(ViewportEvent::CategoryDisplayChanged, |state| {
            for id in category_ids {
                if on {
                    state.viewed_categories.insert(*id);
                } else {
                    state.viewed_categories.remove(id);
                }
                if on && enable_all_sub_categories {
                    if let Some(subs) = state.sub_categories.get(id).cloned() {
                        for sub in subs {
                            state.hidden_sub_categories.remove(&sub);
                        }
                    }
                }
            }
        })
    }

    fn change_sub_category_display(
        &self,
        sub_category_id: SubCategoryId,
        on: bool,
    ) -> anyhow::Result<()> {
        self.mutate(ViewportEvent::SubCategoryDisplayChanged, |state| {
            if on {
                state.hidden_sub_categories.remove(&sub_category_id);
            } else {
                state.hidden_sub_categories.insert(sub_category_id);
            }
        })
    }

    fn set_category_override(
        &self,
        model_id: ModelId,
        category_ids: &[CategoryId],
        value: CategoryOverride,
    ) -> anyhow::Result<()> {
        self.mutate(ViewportEvent::CategoryOverridesChanged, |state| {
            for id in category_ids {
                match value {
                    CategoryOverride::None => {
                        state.overrides.remove(&(model_id, *id));
                    }
                    CategoryOverride::Show | CategoryOverride::Hide => {
                        state.overrides.insert((model_id, *id), value);
                    }
                }
            }
        })
    }

    fn clear_category_overrides(&self, model_ids: &[ModelId]) -> anyhow::Result<()> {
        self.mutate(ViewportEvent::CategoryOverridesChanged, |state| {
            state
                .overrides
                .retain(|(model_id, _), _| !model_ids.contains(model_id));
        })
    }

    fn set_always_drawn(&self, element_ids: ElementSet, exclusive: bool) -> anyhow::Result<()> {
        self.mutate(ViewportEvent::AlwaysDrawnChanged, |state| {
            state.always_drawn = Arc::new(element_ids);
            state.exclusive = exclusive;
        })?;
        self.drawn_set_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_never_drawn(&self, element_ids: ElementSet) -> anyhow::Result<()> {
        self.mutate(ViewportEvent::NeverDrawnChanged, |state| {
            state.never_drawn = Arc::new(element_ids);
        })?;
        self.drawn_set_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear_always_drawn(&self) -> anyhow::Result<()> {
        self.mutate(ViewportEvent::AlwaysDrawnChanged, |state| {
            state.always_drawn = Arc::new(ElementSet::new());
            state.exclusive = false;
        })
    }

    fn clear_never_drawn(&self) -> anyhow::Result<()> {
        self.mutate(ViewportEvent::NeverDrawnChanged, |state| {
            state.never_drawn = Arc::new(ElementSet::new());
        })
    }

    fn add_listener(&self, listener: ViewportListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
    }
}

// ============================================================================
// ID CACHE
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct ElementRecord {
    model_id: ModelId,
    category_id: CategoryId,
    sub_model: Option<ModelId>,
}

#[derive(Debug, Default)]
struct IdCacheData {
    models: BTreeMap<ModelId, BTreeSet<CategoryId>>,
    elements: HashMap<ElementId, ElementRecord>,
    subjects: HashMap<SubjectId, Vec<ModelId>>,
    tables: HashMap<ClassificationTableId, Vec<ClassificationId>>,
    classification_children: HashMap<ClassificationId, Vec<ClassificationId>>,
    classification_categories: HashMap<ClassificationId, Vec<CategoryId>>,
}

/// Id cache over an in-process element registry.
#[derive(Debug, Default)]
pub struct MemoryIdCache {
    data: RwLock<IdCacheData>,
    latency: Option<Duration>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every lookup sleeps for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn add_model(&self, model_id: ModelId) {
        self.write().models.entry(model_id).or_default();
    }

    pub fn add_element(&self, model_id: ModelId, category_id: CategoryId, element_id: ElementId) {
        let mut data = self.write();
        data.models.entry(model_id).or_default().insert(category_id);
        data.elements.insert(
            element_id,
            ElementRecord {
                model_id,
                category_id,
                sub_model: None,
            },
        );
    }

    /// Add `count` elements with consecutive ids starting at `first`.
    pub fn add_elements(
        &self,
        model_id: ModelId,
        category_id: CategoryId,
        first: ElementId,
        count: u64,
    ) -> Vec<ElementId> {
        (0..count)
            .map(|offset| {
                let id = ElementId::from(first.0 + offset);
                self.add_element(model_id, category_id, id);
                id
            })
            .collect()
    }

    /// Declare that `element_id` hosts `sub_model_id`.
    pub fn add_sub_model(&self, element_id: ElementId, sub_model_id: ModelId) {
        let mut data = self.write();
        data.models.entry(sub_model_id).or_default();
        if let Some(record) = data.elements.get_mut(&element_id) {
            record.sub_model = Some(sub_model_id);
        }
    }

    pub fn add_subject(&self, subject_id: SubjectId, model_ids: impl IntoIterator<Item = ModelId>) {
        self.write()
            .subjects
            .entry(subject_id)
            .or_default()
            .extend(model_ids);
    }

    pub fn add_classification_table(
        &self,
        table_id: ClassificationTableId,
        classification_ids: impl IntoIterator<Item = ClassificationId>,
    ) {
        self.write()
            .tables
            .entry(table_id)
            .or_default()
            .extend(classification_ids);
    }

    /// Register a classification, optionally below `parent`, with its related categories.
    pub fn add_classification(
        &self,
        parent: Option<ClassificationId>,
        classification_id: ClassificationId,
        category_ids: impl IntoIterator<Item = CategoryId>,
    ) {
        let mut data = self.write();
        data.classification_categories
            .entry(classification_id)
            .or_default()
            .extend(category_ids);
        if let Some(parent) = parent {
            data.classification_children
                .entry(parent)
                .or_default()
                .push(classification_id);
        }
    }

    /// Forget a model and all of its elements.
    pub fn remove_model(&self, model_id: ModelId) {
        let mut data = self.write();
        data.models.remove(&model_id);
        data.elements.retain(|_, record| record.model_id != model_id);
    }

    /// Make every following lookup fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of lookups answered (or failed) so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, IdCacheData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, IdCacheData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    async fn lookup(&self) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            bail!("id cache unavailable");
        }
        Ok(())
    }

    fn collect_classifications(
        data: &IdCacheData,
        roots: &[ClassificationId],
    ) -> BTreeSet<ClassificationId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<ClassificationId> = roots.to_vec();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(children) = data.classification_children.get(&id) {
                stack.extend(children.iter().copied());
            }
        }
        seen
    }
}

#[async_trait]
impl IdCache for MemoryIdCache {
    async fn get_subject_model_ids(&self, subject_ids: &[SubjectId]) -> anyhow::Result<Vec<ModelId>> {
        self.lookup().await?;
        let data = self.read();
        let mut models = BTreeSet::new();
        for subject_id in subject_ids {
            let subject_models = data
                .subjects
                .get(subject_id)
                .ok_or(LookupError::UnknownSubject(*subject_id))?;
            models.extend(subject_models.iter().copied());
        }
        Ok(models.into_iter().collect())
    }

    async fn get_model_categories(&self, model_id: ModelId) -> anyhow::Result<Vec<CategoryId>> {
        self.lookup().await?;
        let data = self.read();
        let categories = data
            .models
            .get(&model_id)
            .ok_or(LookupError::UnknownModel(model_id))?;
        Ok(categories.iter().copied().collect())
    }

    async fn get_category_model_ids(
        &self,
        category_id: CategoryId,
    ) -> anyhow::Result<Vec<ModelId>> {
        self.lookup().await?;
        let data = self.read();
        Ok(data
            .models
            .iter()
            .filter(|(_, categories)| categories.contains(&category_id))
            .map(|(model_id, _)| *model_id)
            .collect())
    }

    async fn get_category_elements_count(
        &self,
        model_id: ModelId,
        category_id: CategoryId,
    ) -> anyhow::Result<usize> {
        self.lookup().await?;
        let data = self.read();
        let categories = data
            .models
            .get(&model_id)
            .ok_or(LookupError::UnknownModel(model_id))?;
        if !categories.contains(&category_id) {
            return Err(LookupError::UnknownCategory {
                model_id,
                category_id,
            }
            .into());
        }
        Ok(data
            .elements
            .values()
            .filter(|r| r.model_id == model_id && r.category_id == category_id)
            .count())
    }

    async fn get_categories_modeled_elements(
        &self,
        model_id: ModelId,
        category_ids: &[CategoryId],
    ) -> anyhow::Result<Vec<ElementId>> {
        self.lookup().await?;
        let data = self.read();
        let mut modeled: Vec<ElementId> = data
            .elements
            .iter()
            .filter(|(_, r)| {
                r.model_id == model_id
                    && category_ids.contains(&r.category_id)
                    && r.sub_model.is_some()
            })
            .map(|(id, _)| *id)
            .collect();
        modeled.sort();
        Ok(modeled)
    }

    async fn get_sub_model(&self, element_id: ElementId) -> anyhow::Result<Option<ModelId>> {
        self.lookup().await?;
        Ok(self
            .read()
            .elements
            .get(&element_id)
            .and_then(|r| r.sub_model))
    }

    async fn get_elements_info(&self, element_ids: &[ElementId]) -> anyhow::Result<Vec<ElementInfo>> {
        self.lookup().await?;
        let data = self.read();
        Ok(element_ids
            .iter()
            .filter_map(|id| {
                data.elements.get(id).map(|r| ElementInfo {
                    element_id: *id,
                    model_id: r.model_id,
                    category_id: r.category_id,
                })
            })
            .collect())
    }

    async fn get_table_classifications(
        &self,
        table_ids: &[ClassificationTableId],
    ) -> anyhow::Result<Vec<ClassificationId>> {
        self.lookup().await?;
        let data = self.read();
        let roots: Vec<ClassificationId> = table_ids
            .iter()
            .filter_map(|id| data.tables.get(id))
            .flatten()
            .copied()
            .collect();
        Ok(Self::collect_classifications(&data, &roots)
            .into_iter()
            .collect())
    }

    async fn get_classification_categories(
        &self,
        classification_ids: &[ClassificationId],
    ) -> anyhow::Result<Vec<CategoryId>> {
        self.lookup().await?;
        let data = self.read();
        for id in classification_ids {
            if !data.classification_categories.contains_key(id) {
                return Err(LookupError::UnknownClassification(*id).into());
            }
        }
        let mut categories = BTreeSet::new();
        for id in Self::collect_classifications(&data, classification_ids) {
            if let Some(related) = data.classification_categories.get(&id) {
                categories.extend(related.iter().copied());
            }
        }
        Ok(categories.into_iter().collect())
    }
}
