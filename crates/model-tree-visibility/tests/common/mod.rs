//! Shared fixtures for the visibility engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use model_tree_visibility::model_tree_types::{
    CategoryId, ElementId, ElementSet, HierarchyNode, Id64, ModelId, VisibilityStatus,
};
use model_tree_visibility::{
    CategoryOverride, MemoryIdCache, MemoryViewport, VisibilityChange, VisibilityConfig,
    VisibilityEngine, Viewport,
};
use tokio::sync::broadcast::{self, error::TryRecvError};

pub const M1: ModelId = Id64(1);
pub const M2: ModelId = Id64(2);
pub const C10: CategoryId = Id64(10);
pub const C20: CategoryId = Id64(20);
pub const C30: CategoryId = Id64(30);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("model_tree_visibility=debug")
        .with_test_writer()
        .try_init();
}

pub struct Scene {
    pub viewport: Arc<MemoryViewport>,
    pub id_cache: Arc<MemoryIdCache>,
    pub engine: VisibilityEngine,
}

/// Model 1 (viewed) with categories 10 and 20 (both in the selector), five
/// elements each: 100..105 and 200..205. Model 2 (not viewed) with category 30
/// and elements 300..303.
pub fn populate(id_cache: &MemoryIdCache) {
    id_cache.add_elements(M1, C10, Id64(100), 5);
    id_cache.add_elements(M1, C20, Id64(200), 5);
    id_cache.add_elements(M2, C30, Id64(300), 3);
}

pub fn scene() -> Scene {
    scene_with(MemoryIdCache::new(), VisibilityConfig::default())
}

pub fn scene_with(id_cache: MemoryIdCache, config: VisibilityConfig) -> Scene {
    init_tracing();
    populate(&id_cache);
    let viewport = Arc::new(MemoryViewport::spatial([M1], [C10, C20]));
    let id_cache = Arc::new(id_cache);
    let engine = VisibilityEngine::models_tree(viewport.clone(), id_cache.clone(), config);
    Scene {
        viewport,
        id_cache,
        engine,
    }
}

/// Id cache whose every lookup takes 10ms.
pub fn slow_id_cache() -> MemoryIdCache {
    MemoryIdCache::new().with_latency(Duration::from_millis(10))
}

pub fn ids(raw: impl IntoIterator<Item = u64>) -> Vec<ElementId> {
    raw.into_iter().map(Id64).collect()
}

pub fn set(raw: impl IntoIterator<Item = u64>) -> ElementSet {
    raw.into_iter().map(Id64).collect()
}

pub fn element(model_id: ModelId, category_id: CategoryId, id: u64) -> HierarchyNode {
    HierarchyNode::element(model_id, category_id, vec![Id64(id)])
}

/// Let spawned tasks (notifier, queue consumer) run.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Count notifications received so far.
pub fn drain(rx: &mut broadcast::Receiver<VisibilityChange>) -> usize {
    let mut count = 0;
    loop {
        match rx.try_recv() {
            Ok(_) => count += 1,
            Err(TryRecvError::Lagged(n)) => count += n as usize,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return count,
        }
    }
}

/// Status of `node`, asking again while the answer is merely stale.
pub async fn status_of(engine: &VisibilityEngine, node: &HierarchyNode) -> VisibilityStatus {
    for _ in 0..10 {
        match engine.get_visibility_status(node).await {
            Ok(status) => return status,
            Err(err) if err.is_stale() => continue,
            Err(err) => panic!("status query failed: {err}"),
        }
    }
    panic!("status query never settled");
}

/// Comparable picture of the override layers for the ids used in the scene.
#[derive(Debug, PartialEq, Eq)]
pub struct LayerSnapshot {
    pub models: Vec<bool>,
    pub categories: Vec<bool>,
    pub overrides: Vec<CategoryOverride>,
    pub always: Vec<ElementId>,
    pub never: Vec<ElementId>,
    pub exclusive: bool,
}

pub fn snapshot(viewport: &MemoryViewport) -> LayerSnapshot {
    let sorted = |set: &ElementSet| {
        let mut ids: Vec<ElementId> = set.iter().copied().collect();
        ids.sort();
        ids
    };
    LayerSnapshot {
        models: [M1, M2].iter().map(|m| viewport.views_model(*m)).collect(),
        categories: [C10, C20, C30]
            .iter()
            .map(|c| viewport.views_category(*c))
            .collect(),
        overrides: [(M1, C10), (M1, C20), (M2, C30)]
            .iter()
            .map(|(m, c)| viewport.category_override(*m, *c))
            .collect(),
        always: sorted(&viewport.always_drawn()),
        never: sorted(&viewport.never_drawn()),
        exclusive: viewport.is_always_drawn_exclusive(),
    }
}
