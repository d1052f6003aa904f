//! Event coalescing for viewport change notifications.
//!
//! A viewport raises one raw event per mutation; a single user action can cause
//! dozens of them. [`EventCoalescer`] folds them into one debounced
//! [`VisibilityChange`] notification. While a suppression guard is alive
//! (multi-step mutations, change-queue batches) raw events only mark the
//! coalescer dirty, and exactly one notification fires once the last guard is
//! dropped.
//!
//! Unsuppressed events are also counted on a `watch` channel right away, so an
//! in-flight status query can give up without waiting out the debounce.
//!
//! ```text
//! viewport mutator ──► handle_event() ──► dirty ──► notifier task ──► broadcast
//!                                            ▲
//!                          suppress()/drop ──┘ (held back while depth > 0)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::viewport::ViewportEvent;

/// Merged "visibility changed" notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityChange {
    /// Number of notifications emitted so far, including this one.
    pub generation: u64,
}

#[derive(Debug, Default)]
struct CoalescerState {
    suppress_depth: usize,
    dirty: bool,
}

pub struct EventCoalescer {
    state: Mutex<CoalescerState>,
    /// Raw events observed, suppressed or not.
    revision: AtomicU64,
    generation: AtomicU64,
    sender: broadcast::Sender<VisibilityChange>,
    /// Unsuppressed raw events, published as they happen.
    unsuppressed: watch::Sender<u64>,
    wake: Notify,
    debounce: Duration,
    notifier: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for EventCoalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCoalescer")
            .field("revision", &self.revision())
            .field("generation", &self.generation())
            .field("debounce", &self.debounce)
            .finish_non_exhaustive()
    }
}

impl EventCoalescer {
    /// Create the coalescer and spawn its notifier task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(debounce: Duration) -> Arc<Self> {
        let (sender, _) = broadcast::channel(64);
        let (unsuppressed, _) = watch::channel(0);
        let coalescer = Arc::new(Self {
            state: Mutex::new(CoalescerState::default()),
            revision: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            sender,
            unsuppressed,
            wake: Notify::new(),
            debounce,
            notifier: Mutex::new(None),
        });
        let handle = tokio::spawn(coalescer.clone().run());
        *coalescer
            .notifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        coalescer
    }

    async fn run(self: Arc<Self>) {
        loop {
            self.wake.notified().await;
            if self.debounce.is_zero() {
                tokio::task::yield_now().await;
            } else {
                // Every wake-up inside the window starts it over.
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(self.debounce) => break,
                        _ = self.wake.notified() => trace!("Debounce restarted"),
                    }
                }
            }
            self.flush();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CoalescerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush(&self) {
        let fire = {
            let mut state = self.lock();
            if state.dirty && state.suppress_depth == 0 {
                state.dirty = false;
                true
            } else {
                false
            }
        };
        if fire {
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            // No receivers is fine: nobody is listening right now.
            let _ = self.sender.send(VisibilityChange { generation });
            debug!(generation, "Visibility change emitted");
        }
    }

    /// Feed one raw viewport event.
    pub fn handle_event(&self, event: &ViewportEvent) {
        self.revision.fetch_add(1, Ordering::SeqCst);
        let schedule = {
            let mut state = self.lock();
            state.dirty = true;
            state.suppress_depth == 0
        };
        trace!(?event, suppressed = !schedule, "Viewport event");
        if schedule {
            self.unsuppressed.send_modify(|count| *count += 1);
            self.wake.notify_one();
        }
    }

    /// Hold back notifications until the returned guard is dropped.
    ///
    /// Guards nest; only dropping the outermost one can release a notification.
    pub fn suppress(self: &Arc<Self>) -> SuppressionGuard {
        self.lock().suppress_depth += 1;
        SuppressionGuard {
            coalescer: self.clone(),
        }
    }

    fn resume(&self) {
        let schedule = {
            let mut state = self.lock();
            state.suppress_depth = state.suppress_depth.saturating_sub(1);
            state.suppress_depth == 0 && state.dirty
        };
        if schedule {
            self.wake.notify_one();
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VisibilityChange> {
        self.sender.subscribe()
    }

    /// Watch the count of events raised outside any suppression bracket.
    ///
    /// The receiver starts with the current count marked as seen.
    pub fn watch_unsuppressed(&self) -> watch::Receiver<u64> {
        self.unsuppressed.subscribe()
    }

    /// Count of raw events seen; changes on every viewport mutation.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Count of notifications emitted.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_suppressed(&self) -> bool {
        self.lock().suppress_depth > 0
    }

    /// Stop the notifier task. Pending notifications are dropped.
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .notifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Keeps an [`EventCoalescer`] suppressed while alive.
#[must_use = "notifications resume as soon as the guard is dropped"]
pub struct SuppressionGuard {
    coalescer: Arc<EventCoalescer>,
}

impl std::fmt::Debug for SuppressionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuppressionGuard").finish()
    }
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        self.coalescer.resume();
    }
}
