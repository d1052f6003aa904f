//! The visibility engine facade.
//!
//! ```text
//! get_visibility_status ─► coordinator ticket ─► select! { superseded
//!                                                         | change notification
//!                                                         | unsuppressed raw event
//!                                                         | StatusComputer::compute }
//!
//! change_visibility ─► ticket + suppression ─► plan (cancellable)
//!                                           ─► apply (runs to completion) ─► ChangeQueue
//! ```
//!
//! One engine serves one tree. The hierarchy shape decides what the nodes mean;
//! everything else is shared.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use model_tree_types::{HierarchyNode, VisibilityStatus};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::changer::{apply_ops, ChangePlanner, ViewportOp};
use crate::coalescer::{EventCoalescer, VisibilityChange};
use crate::computer::StatusComputer;
use crate::config::VisibilityConfig;
use crate::coordinator::RequestCoordinator;
use crate::element_sets::ElementSetCache;
use crate::error::{VisibilityError, VisibilityResult};
use crate::filtered::FilteredTree;
use crate::id_cache::{is_missing_context, IdCache};
use crate::queue::ChangeQueue;
use crate::shape::{ClassificationsTreeShape, HierarchyShape, ModelsTreeShape};
use crate::viewport::{ListenerId, Viewport};

// ============================================================================
// BUILDER
// ============================================================================

/// Builder for [`VisibilityEngine`]. The shape defaults to the models tree.
pub struct VisibilityEngineBuilder {
    viewport: Arc<dyn Viewport>,
    id_cache: Arc<dyn IdCache>,
    shape: Arc<dyn HierarchyShape>,
    filtered: Option<Arc<dyn FilteredTree>>,
    config: VisibilityConfig,
}

impl VisibilityEngineBuilder {
    pub fn shape(mut self, shape: Arc<dyn HierarchyShape>) -> Self {
        self.shape = shape;
        self
    }

    pub fn filtered_tree(mut self, filtered: Arc<dyn FilteredTree>) -> Self {
        self.filtered = Some(filtered);
        self
    }

    pub fn config(mut self, config: VisibilityConfig) -> Self {
        self.config = config;
        self
    }

    /// Subscribe to the viewport and spawn the notifier and queue tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> VisibilityEngine {
        let coalescer = EventCoalescer::spawn(self.config.debounce());
        let element_sets = Arc::new(ElementSetCache::new(
            self.viewport.clone(),
            self.id_cache.clone(),
            coalescer.clone(),
        ));
        let computer = StatusComputer::new(
            self.viewport.clone(),
            self.id_cache.clone(),
            self.shape.clone(),
            self.filtered,
            element_sets.clone(),
            self.config.direct_lookup_limit,
        );
        let queue = ChangeQueue::spawn(
            self.viewport.clone(),
            coalescer.clone(),
            self.config.queue_capacity,
            self.config.yield_every,
        );
        let listener_coalescer = coalescer.clone();
        let listener = self
            .viewport
            .add_listener(Arc::new(move |event| listener_coalescer.handle_event(event)));

        info!(
            shape = self.shape.name(),
            debounce_ms = self.config.debounce_ms,
            queue_capacity = self.config.queue_capacity,
            "Visibility engine created"
        );

        VisibilityEngine {
            inner: Arc::new(EngineInner {
                viewport: self.viewport,
                id_cache: self.id_cache,
                shape: self.shape,
                config: self.config,
                coalescer,
                element_sets,
                computer,
                queue,
                coordinator: RequestCoordinator::new(),
                listener: Mutex::new(Some(listener)),
                disposed: AtomicBool::new(false),
            }),
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

struct EngineInner {
    viewport: Arc<dyn Viewport>,
    id_cache: Arc<dyn IdCache>,
    shape: Arc<dyn HierarchyShape>,
    config: VisibilityConfig,
    coalescer: Arc<EventCoalescer>,
    element_sets: Arc<ElementSetCache>,
    computer: StatusComputer,
    queue: ChangeQueue,
    coordinator: Arc<RequestCoordinator>,
    listener: Mutex<Option<ListenerId>>,
    disposed: AtomicBool,
}

impl EngineInner {
    fn ensure_live(&self) -> VisibilityResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(VisibilityError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Why a ticket fired: a newer request, or disposal.
    fn cancellation(&self) -> VisibilityError {
        if self.disposed.load(Ordering::SeqCst) {
            VisibilityError::Disposed
        } else {
            VisibilityError::Superseded
        }
    }

    async fn plan_change(&self, node: &HierarchyNode, on: bool) -> VisibilityResult<Vec<ViewportOp>> {
        match self.plan_resolved(node, on).await {
            Err(VisibilityError::Upstream(err)) if is_missing_context(&err) => {
                debug!(kind = node.key.kind_name(), error = %err, "Missing context, nothing to change");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    async fn plan_resolved(&self, node: &HierarchyNode, on: bool) -> VisibilityResult<Vec<ViewportOp>> {
        let Some(targets) = self.computer.targets(node).await? else {
            warn!(
                kind = node.key.kind_name(),
                shape = self.shape.name(),
                "Node cannot be resolved, nothing to change"
            );
            return Ok(Vec::new());
        };
        ChangePlanner::new(
            self.viewport.as_ref(),
            self.id_cache.as_ref(),
            &self.computer,
            &self.element_sets,
            self.shape.considers_sub_models(),
        )
        .plan(&targets, on)
        .await
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            self.viewport.remove_listener(listener);
        }
        self.coordinator.cancel_all();
        self.coalescer.shutdown();
        self.queue.close();
        info!(shape = self.shape.name(), "Visibility engine disposed");
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Hierarchical visibility engine for one tree.
///
/// Cheap to clone; clones share state. Dropping the last clone disposes it.
#[derive(Clone)]
pub struct VisibilityEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for VisibilityEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisibilityEngine")
            .field("shape", &self.inner.shape.name())
            .field("config", &self.inner.config)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl VisibilityEngine {
    pub fn builder(viewport: Arc<dyn Viewport>, id_cache: Arc<dyn IdCache>) -> VisibilityEngineBuilder {
        VisibilityEngineBuilder {
            viewport,
            id_cache,
            shape: Arc::new(ModelsTreeShape),
            filtered: None,
            config: VisibilityConfig::default(),
        }
    }

    /// Engine for the subjects → models → categories → elements tree.
    pub fn models_tree(
        viewport: Arc<dyn Viewport>,
        id_cache: Arc<dyn IdCache>,
        config: VisibilityConfig,
    ) -> Self {
        Self::builder(viewport, id_cache).config(config).build()
    }

    /// Engine for the classification tables → classifications → categories tree.
    pub fn classifications_tree(
        viewport: Arc<dyn Viewport>,
        id_cache: Arc<dyn IdCache>,
        config: VisibilityConfig,
    ) -> Self {
        Self::builder(viewport, id_cache)
            .shape(Arc::new(ClassificationsTreeShape))
            .config(config)
            .build()
    }

    /// Current status of `node`.
    ///
    /// Fails with [`VisibilityError::Superseded`] when a newer request for the
    /// same node starts first, and with [`VisibilityError::VisibilityChanged`]
    /// when a change notification or a viewport event outside the engine's own
    /// changes arrives first. Neither is a fault; ask again.
    pub async fn get_visibility_status(
        &self,
        node: &HierarchyNode,
    ) -> VisibilityResult<VisibilityStatus> {
        let inner = &self.inner;
        inner.ensure_live()?;
        let mut ticket = inner.coordinator.begin(node.identity());
        let mut changes = inner.coalescer.subscribe();
        let mut raw_events = inner.coalescer.watch_unsuppressed();

        let result = tokio::select! {
            biased;
            _ = ticket.superseded() => Err(inner.cancellation()),
            change = changes.recv() => Err(match change {
                Err(RecvError::Closed) => VisibilityError::Disposed,
                Ok(_) | Err(RecvError::Lagged(_)) => VisibilityError::VisibilityChanged,
            }),
            // Fires on the event itself, ahead of the debounced notification.
            changed = raw_events.changed() => Err(match changed {
                Ok(()) => VisibilityError::VisibilityChanged,
                Err(_) => VisibilityError::Disposed,
            }),
            status = inner.computer.compute(node) => status,
        };
        if let Err(err) = &result {
            debug!(kind = node.key.kind_name(), depth = node.depth, error = %err, "Status not delivered");
        }
        result
    }

    /// Turn `node` on or off.
    ///
    /// Planning gives way to a newer request for the same node. Once the plan
    /// is being applied it runs to completion even if this future is dropped.
    /// Exactly one change notification follows.
    pub async fn change_visibility(&self, node: &HierarchyNode, on: bool) -> VisibilityResult<()> {
        let inner = &self.inner;
        inner.ensure_live()?;
        if inner.computer.is_disabled(node) {
            debug!(kind = node.key.kind_name(), "Disabled node, ignoring change");
            return Ok(());
        }
        let mut ticket = inner.coordinator.begin(node.identity());
        let suppressed = inner.coalescer.suppress();

        let ops = tokio::select! {
            biased;
            _ = ticket.superseded() => return Err(inner.cancellation()),
            ops = inner.plan_change(node, on) => ops?,
        };
        info!(
            kind = node.key.kind_name(),
            depth = node.depth,
            on,
            ops = ops.len(),
            "Applying visibility change"
        );

        let engine = self.inner.clone();
        let applied = tokio::spawn(async move {
            let _suppressed = suppressed;
            apply_ops(ops, engine.viewport.as_ref(), &engine.queue).await
        });
        let result = match applied.await {
            Ok(result) => result,
            Err(e) => Err(VisibilityError::Upstream(anyhow::Error::new(e))),
        };
        drop(ticket);
        result
    }

    /// Apply a ready-made plan under one suppression bracket.
    pub(crate) async fn apply_plan(&self, ops: Vec<ViewportOp>) -> VisibilityResult<()> {
        self.inner.ensure_live()?;
        let _suppressed = self.inner.coalescer.suppress();
        apply_ops(ops, self.inner.viewport.as_ref(), &self.inner.queue).await
    }

    /// Merged, debounced "visibility changed" notifications.
    pub fn on_visibility_change(&self) -> broadcast::Receiver<VisibilityChange> {
        self.inner.coalescer.subscribe()
    }

    /// Unsubscribe from the viewport and cancel everything in flight.
    ///
    /// Queue batches that already started still complete. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub fn viewport(&self) -> &Arc<dyn Viewport> {
        &self.inner.viewport
    }

    pub(crate) fn id_cache(&self) -> &Arc<dyn IdCache> {
        &self.inner.id_cache
    }

    pub fn config(&self) -> &VisibilityConfig {
        &self.inner.config
    }

    /// Number of status queries and changes currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.coordinator.in_flight()
    }
}
