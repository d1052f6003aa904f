//! The change queue: the engine's only writer of the always/never-drawn sets.
//!
//! Jobs are applied strictly in submission order by a single consumer task.
//! Each batch runs under a coalescer suppression guard, works out its
//! additions and removals in memory (yielding to the scheduler every
//! `yield_every` elements), then re-reads the live sets and commits each
//! changed set exactly once.
//!
//! Dropping a [`BatchCompletion`] only stops waiting: the batch still runs.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use model_tree_types::{ElementId, ElementSet};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::coalescer::EventCoalescer;
use crate::error::{VisibilityError, VisibilityResult};
use crate::viewport::Viewport;

/// One unit of work for the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueJob {
    /// Turn elements on or off. `visible_by_default` is what the elements
    /// would show without any always/never-drawn entry.
    Elements {
        element_ids: Vec<ElementId>,
        on: bool,
        visible_by_default: bool,
    },
    /// Drop elements from both sets so they fall back to their default.
    Forget { element_ids: Vec<ElementId> },
    /// Empty both sets and leave exclusive mode.
    ClearAll,
}

impl QueueJob {
    fn label(&self) -> &'static str {
        match self {
            QueueJob::Elements { on: true, .. } => "show",
            QueueJob::Elements { on: false, .. } => "hide",
            QueueJob::Forget { .. } => "forget",
            QueueJob::ClearAll => "clear",
        }
    }

    fn len(&self) -> usize {
        match self {
            QueueJob::Elements { element_ids, .. } | QueueJob::Forget { element_ids } => {
                element_ids.len()
            }
            QueueJob::ClearAll => 0,
        }
    }
}

type BatchResult = anyhow::Result<()>;

struct Batch {
    job: QueueJob,
    done: oneshot::Sender<BatchResult>,
}

/// Resolves once the batch has been applied (or failed).
#[derive(Debug)]
#[must_use = "dropping the completion does not cancel the batch"]
pub struct BatchCompletion {
    receiver: oneshot::Receiver<BatchResult>,
}

impl BatchCompletion {
    pub async fn wait(self) -> VisibilityResult<()> {
        match self.receiver.await {
            Ok(result) => result.map_err(VisibilityError::from),
            Err(_) => Err(VisibilityError::QueueClosed),
        }
    }
}

/// Pending set edits of one batch.
#[derive(Debug, Default)]
struct SetDelta {
    always_add: Vec<ElementId>,
    always_remove: Vec<ElementId>,
    never_add: Vec<ElementId>,
    never_remove: Vec<ElementId>,
}

/// Apply removals then additions; true if `set` changed.
fn edit(set: &mut ElementSet, remove: &[ElementId], add: &[ElementId]) -> bool {
    let mut changed = false;
    for id in remove {
        changed |= set.remove(id);
    }
    for id in add {
        changed |= set.insert(*id);
    }
    changed
}

pub struct ChangeQueue {
    sender: Mutex<Option<mpsc::Sender<Batch>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ChangeQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeQueue")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl ChangeQueue {
    /// Create the queue and spawn its consumer. Must run inside a tokio runtime.
    pub fn spawn(
        viewport: Arc<dyn Viewport>,
        coalescer: Arc<EventCoalescer>,
        capacity: usize,
        yield_every: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let consumer = QueueConsumer {
            receiver,
            viewport,
            coalescer,
            yield_every,
        };
        let handle = tokio::spawn(consumer.run());
        Self {
            sender: Mutex::new(Some(sender)),
            consumer: Mutex::new(Some(handle)),
        }
    }

    /// Submit a job. Waits only for channel capacity, not for the job itself.
    pub async fn enqueue(&self, job: QueueJob) -> VisibilityResult<BatchCompletion> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(VisibilityError::QueueClosed)?;
        let (done, receiver) = oneshot::channel();
        sender
            .send(Batch { job, done })
            .await
            .map_err(|_| VisibilityError::QueueClosed)?;
        Ok(BatchCompletion { receiver })
    }

    /// Stop accepting jobs. Jobs already submitted are still applied.
    pub fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_open(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Wait for the consumer to finish after [`close`](Self::close).
    pub async fn join(&self) {
        let handle = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Change queue consumer ended abnormally");
            }
        }
    }
}

struct QueueConsumer {
    receiver: mpsc::Receiver<Batch>,
    viewport: Arc<dyn Viewport>,
    coalescer: Arc<EventCoalescer>,
    yield_every: usize,
}

impl QueueConsumer {
    async fn run(mut self) {
        debug!(yield_every = self.yield_every, "Change queue started");
        while let Some(Batch { job, done }) = self.receiver.recv().await {
            let started = Instant::now();
            let result = {
                let _suppressed = self.coalescer.suppress();
                self.apply(&job).await
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(()) => debug!(job = job.label(), elements = job.len(), elapsed_ms, "Batch applied"),
                Err(e) => warn!(
                    job = job.label(),
                    elements = job.len(),
                    error = %e,
                    "Batch failed"
                ),
            }
            // The waiter may have gone away; the batch is done either way.
            let _ = done.send(result);
        }
        info!("Change queue closed");
    }

    async fn apply(&self, job: &QueueJob) -> BatchResult {
        match job {
            QueueJob::ClearAll => {
                let previous_never = self.viewport.never_drawn();
                self.viewport.clear_never_drawn()?;
                if let Err(e) = self.viewport.clear_always_drawn() {
                    self.restore_never(&previous_never);
                    return Err(e);
                }
                Ok(())
            }
            QueueJob::Forget { element_ids } => {
                let delta = SetDelta {
                    always_remove: element_ids.clone(),
                    never_remove: element_ids.clone(),
                    ..SetDelta::default()
                };
                self.commit(&delta)
            }
            QueueJob::Elements {
                element_ids,
                on,
                visible_by_default,
            } => {
                let delta = self
                    .plan(element_ids, *on, *visible_by_default)
                    .await;
                self.commit(&delta)
            }
        }
    }

    async fn plan(&self, element_ids: &[ElementId], on: bool, visible_by_default: bool) -> SetDelta {
        let exclusive = self.viewport.is_always_drawn_exclusive();
        let mut delta = SetDelta::default();
        for (i, id) in element_ids.iter().enumerate() {
            if self.yield_every > 0 && i > 0 && i % self.yield_every == 0 {
                tokio::task::yield_now().await;
            }
            if on {
                delta.never_remove.push(*id);
                if !visible_by_default || exclusive {
                    delta.always_add.push(*id);
                }
            } else {
                delta.always_remove.push(*id);
                if visible_by_default && !exclusive {
                    delta.never_add.push(*id);
                }
            }
        }
        delta
    }

    /// Apply `delta` to the live sets, writing each changed set once.
    ///
    /// Both sets are edited before either is written. Never-drawn is written
    /// first and put back if the always-drawn write then fails, so a failed
    /// batch leaves both sets as it found them.
    fn commit(&self, delta: &SetDelta) -> BatchResult {
        let previous_never = self.viewport.never_drawn();
        let mut never = (*previous_never).clone();
        let never_changed = edit(&mut never, &delta.never_remove, &delta.never_add);
        let mut always = (*self.viewport.always_drawn()).clone();
        let always_changed = edit(&mut always, &delta.always_remove, &delta.always_add);

        if never_changed {
            self.viewport.set_never_drawn(never)?;
        }
        if always_changed {
            let exclusive = self.viewport.is_always_drawn_exclusive();
            if let Err(e) = self.viewport.set_always_drawn(always, exclusive) {
                if never_changed {
                    self.restore_never(&previous_never);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn restore_never(&self, previous: &ElementSet) {
        match self.viewport.set_never_drawn(previous.clone()) {
            Ok(()) => debug!(elements = previous.len(), "Never-drawn set restored"),
            Err(e) => warn!(error = %e, "Could not restore never-drawn set"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryViewport;
    use crate::viewport::ViewType;
    use model_tree_types::Id64;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn ids(raw: &[u64]) -> Vec<ElementId> {
        raw.iter().map(|id| Id64(*id)).collect()
    }

    fn set(raw: &[u64]) -> ElementSet {
        raw.iter().map(|id| Id64(*id)).collect()
    }

    fn queue(viewport: &Arc<MemoryViewport>) -> ChangeQueue {
        ChangeQueue::spawn(
            viewport.clone(),
            EventCoalescer::spawn(Duration::ZERO),
            4,
            2,
        )
    }

    fn hide(raw: &[u64]) -> QueueJob {
        QueueJob::Elements {
            element_ids: ids(raw),
            on: false,
            visible_by_default: true,
        }
    }

    fn show(raw: &[u64]) -> QueueJob {
        QueueJob::Elements {
            element_ids: ids(raw),
            on: true,
            visible_by_default: true,
        }
    }

    #[tokio::test]
    async fn test_batches_apply_in_submission_order() {
        let viewport = Arc::new(MemoryViewport::new(ViewType::Spatial));
        let queue = queue(&viewport);
        let first = queue.enqueue(hide(&[1, 2, 3])).await.unwrap();
        let second = queue.enqueue(show(&[2, 3, 4])).await.unwrap();
        second.wait().await.unwrap();
        first.wait().await.unwrap();
        assert_eq!(*viewport.never_drawn(), set(&[1]));
        assert!(viewport.always_drawn().is_empty());
    }

    #[tokio::test]
    async fn test_hidden_by_default_elements_go_to_always_drawn() {
        let viewport = Arc::new(MemoryViewport::new(ViewType::Spatial));
        let queue = queue(&viewport);
        let job = QueueJob::Elements {
            element_ids: ids(&[5, 6]),
            on: true,
            visible_by_default: false,
        };
        queue.enqueue(job).await.unwrap().wait().await.unwrap();
        assert_eq!(*viewport.always_drawn(), set(&[5, 6]));

        let off = QueueJob::Elements {
            element_ids: ids(&[5]),
            on: false,
            visible_by_default: false,
        };
        queue.enqueue(off).await.unwrap().wait().await.unwrap();
        assert_eq!(*viewport.always_drawn(), set(&[6]));
        assert!(viewport.never_drawn().is_empty());
    }

    #[tokio::test]
    async fn test_exclusive_mode_keeps_flag_and_skips_never_drawn() {
        let viewport = Arc::new(MemoryViewport::new(ViewType::Spatial));
        viewport.set_always_drawn(set(&[1, 2]), true).unwrap();
        let queue = queue(&viewport);
        queue.enqueue(hide(&[1])).await.unwrap().wait().await.unwrap();
        queue.enqueue(show(&[3])).await.unwrap().wait().await.unwrap();
        assert_eq!(*viewport.always_drawn(), set(&[2, 3]));
        assert!(viewport.never_drawn().is_empty());
        assert!(viewport.is_always_drawn_exclusive());
    }

    #[tokio::test]
    async fn test_each_set_committed_at_most_once() {
        let viewport = Arc::new(MemoryViewport::new(ViewType::Spatial));
        let queue = queue(&viewport);
        let many: Vec<u64> = (1..=1000).collect();
        queue.enqueue(hide(&many)).await.unwrap().wait().await.unwrap();
        assert_eq!(viewport.drawn_set_writes(), 1);
        assert_eq!(viewport.never_drawn().len(), 1000);

        // Nothing to change: no write at all.
        queue.enqueue(hide(&many)).await.unwrap().wait().await.unwrap();
        assert_eq!(viewport.drawn_set_writes(), 1);
    }

    #[tokio::test]
    async fn test_failed_batch_releases_queue() {
        let viewport = Arc::new(MemoryViewport::new(ViewType::Spatial));
        let queue = queue(&viewport);
        viewport.fail_next_writes(1);
        let failed = queue.enqueue(hide(&[1])).await.unwrap();
        let next = queue.enqueue(hide(&[2])).await.unwrap();
        assert!(matches!(
            failed.wait().await,
            Err(VisibilityError::Upstream(_))
        ));
        next.wait().await.unwrap();
        assert_eq!(*viewport.never_drawn(), set(&[2]));
    }

    #[tokio::test]
    async fn test_failed_always_write_restores_never_drawn() {
        let viewport = Arc::new(MemoryViewport::new(ViewType::Spatial));
        viewport.set_always_drawn(set(&[1]), false).unwrap();
        viewport.set_never_drawn(set(&[9])).unwrap();
        let queue = queue(&viewport);

        viewport.fail_writes_after(1, 1);
        let result = queue.enqueue(hide(&[1, 2])).await.unwrap().wait().await;
        assert!(matches!(result, Err(VisibilityError::Upstream(_))));
        assert_eq!(*viewport.never_drawn(), set(&[9]));
        assert_eq!(*viewport.always_drawn(), set(&[1]));

        queue.enqueue(hide(&[1, 2])).await.unwrap().wait().await.unwrap();
        assert_eq!(*viewport.never_drawn(), set(&[1, 2, 9]));
        assert!(viewport.always_drawn().is_empty());
    }

    #[tokio::test]
    async fn test_failed_clear_restores_never_drawn() {
        let viewport = Arc::new(MemoryViewport::new(ViewType::Spatial));
        viewport.set_always_drawn(set(&[1]), true).unwrap();
        viewport.set_never_drawn(set(&[2])).unwrap();
        let queue = queue(&viewport);

        viewport.fail_writes_after(1, 1);
        let result = queue.enqueue(QueueJob::ClearAll).await.unwrap().wait().await;
        assert!(result.is_err());
        assert_eq!(*viewport.never_drawn(), set(&[2]));
        assert!(viewport.is_always_drawn_exclusive());
    }

    #[tokio::test]
    async fn test_abandoned_completion_still_applies() {
        let viewport = Arc::new(MemoryViewport::new(ViewType::Spatial));
        let queue = queue(&viewport);
        drop(queue.enqueue(hide(&[7])).await.unwrap());
        queue
            .enqueue(QueueJob::Forget {
                element_ids: ids(&[99]),
            })
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(*viewport.never_drawn(), set(&[7]));
    }

    #[tokio::test]
    async fn test_forget_and_clear() {
        let viewport = Arc::new(MemoryViewport::new(ViewType::Spatial));
        viewport.set_never_drawn(set(&[1, 2])).unwrap();
        viewport.set_always_drawn(set(&[3]), true).unwrap();
        let queue = queue(&viewport);
        queue
            .enqueue(QueueJob::Forget {
                element_ids: ids(&[1, 3]),
            })
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(*viewport.never_drawn(), set(&[2]));
        assert!(viewport.always_drawn().is_empty());

        queue.enqueue(QueueJob::ClearAll).await.unwrap().wait().await.unwrap();
        assert!(viewport.never_drawn().is_empty());
        assert!(!viewport.is_always_drawn_exclusive());
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_jobs() {
        let viewport = Arc::new(MemoryViewport::new(ViewType::Spatial));
        let queue = queue(&viewport);
        let pending = queue.enqueue(hide(&[1])).await.unwrap();
        queue.close();
        assert!(matches!(
            queue.enqueue(hide(&[2])).await,
            Err(VisibilityError::QueueClosed)
        ));
        pending.wait().await.unwrap();
        queue.join().await;
        assert_eq!(*viewport.never_drawn(), set(&[1]));
    }
}
