//! Memoized always/never-drawn lookups.
//!
//! The always/never-drawn sets are global and can hold tens of thousands of
//! ids. Status computation needs them narrowed to one model, one category or an
//! explicit element filter, for many nodes in a row. [`ElementSetCache`]
//! resolves each global set into a (model, category) index once per viewport
//! revision and memoizes every narrowed result until the next viewport change.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use model_tree_types::{CategoryId, ElementId, ElementSet, ModelId};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::coalescer::EventCoalescer;
use crate::error::VisibilityResult;
use crate::id_cache::IdCache;
use crate::viewport::Viewport;

/// What part of a global set a caller is interested in.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ElementScope {
    Model(ModelId),
    Category {
        model_id: ModelId,
        category_id: CategoryId,
    },
    Elements(Vec<ElementId>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SetKind {
    Always,
    Never,
}

#[derive(Debug, Default)]
struct ElementIndex {
    by_model: HashMap<ModelId, ElementSet>,
    by_category: HashMap<(ModelId, CategoryId), ElementSet>,
}

type IndexCell = Arc<OnceCell<Arc<ElementIndex>>>;

#[derive(Default)]
struct Generation {
    revision: u64,
    always: IndexCell,
    never: IndexCell,
    scoped: HashMap<(ElementScope, SetKind), Arc<ElementSet>>,
}

impl Generation {
    fn at(revision: u64) -> Self {
        Self {
            revision,
            ..Self::default()
        }
    }

    fn index_cell(&self, kind: SetKind) -> IndexCell {
        match kind {
            SetKind::Always => self.always.clone(),
            SetKind::Never => self.never.clone(),
        }
    }
}

pub struct ElementSetCache {
    viewport: Arc<dyn Viewport>,
    id_cache: Arc<dyn IdCache>,
    coalescer: Arc<EventCoalescer>,
    current: Mutex<Generation>,
    index_builds: AtomicUsize,
}

impl std::fmt::Debug for ElementSetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementSetCache")
            .field("index_builds", &self.index_builds())
            .finish_non_exhaustive()
    }
}

impl ElementSetCache {
    pub fn new(
        viewport: Arc<dyn Viewport>,
        id_cache: Arc<dyn IdCache>,
        coalescer: Arc<EventCoalescer>,
    ) -> Self {
        Self {
            viewport,
            id_cache,
            coalescer,
            current: Mutex::new(Generation::default()),
            index_builds: AtomicUsize::new(0),
        }
    }

    /// Elements of the `kind` set that fall inside `scope`.
    pub async fn get_elements(
        &self,
        scope: &ElementScope,
        kind: SetKind,
    ) -> VisibilityResult<Arc<ElementSet>> {
        let revision = self.coalescer.revision();
        let cell = {
            let mut current = self.lock();
            if current.revision != revision {
                *current = Generation::at(revision);
            }
            if let Some(hit) = current.scoped.get(&(scope.clone(), kind)) {
                return Ok(hit.clone());
            }
            current.index_cell(kind)
        };

        let narrowed = match scope {
            ElementScope::Elements(ids) => {
                let source = self.source(kind);
                Arc::new(ids.iter().filter(|id| source.contains(*id)).copied().collect())
            }
            ElementScope::Model(model_id) => {
                let index = self.index(&cell, kind).await?;
                Arc::new(index.by_model.get(model_id).cloned().unwrap_or_default())
            }
            ElementScope::Category {
                model_id,
                category_id,
            } => {
                let index = self.index(&cell, kind).await?;
                Arc::new(
                    index
                        .by_category
                        .get(&(*model_id, *category_id))
                        .cloned()
                        .unwrap_or_default(),
                )
            }
        };

        let mut current = self.lock();
        if current.revision == revision {
            current.scoped.insert((scope.clone(), kind), narrowed.clone());
        }
        Ok(narrowed)
    }

    /// Number of global-set index builds so far.
    pub fn index_builds(&self) -> usize {
        self.index_builds.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Generation> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn source(&self, kind: SetKind) -> Arc<ElementSet> {
        match kind {
            SetKind::Always => self.viewport.always_drawn(),
            SetKind::Never => self.viewport.never_drawn(),
        }
    }

    async fn index(&self, cell: &IndexCell, kind: SetKind) -> VisibilityResult<Arc<ElementIndex>> {
        let index = cell
            .get_or_try_init(|| async {
                let ids: Vec<ElementId> = self.source(kind).iter().copied().collect();
                let mut index = ElementIndex::default();
                if !ids.is_empty() {
                    for info in self.id_cache.get_elements_info(&ids).await? {
                        index
                            .by_model
                            .entry(info.model_id)
                            .or_default()
                            .insert(info.element_id);
                        index
                            .by_category
                            .entry((info.model_id, info.category_id))
                            .or_default()
                            .insert(info.element_id);
                    }
                }
                self.index_builds.fetch_add(1, Ordering::SeqCst);
                debug!(?kind, elements = ids.len(), "Indexed drawn set");
                Ok::<_, anyhow::Error>(Arc::new(index))
            })
            .await?;
        Ok(index.clone())
    }
}
