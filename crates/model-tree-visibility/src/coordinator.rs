//! Per-node request supersession.
//!
//! Every status query and mutation takes a [`RequestTicket`] for its
//! (node key, depth) identity. Taking a ticket fires the cancel signal of the
//! previous holder, which then gives up at its next suspension point. The
//! bookkeeping mutex is never held across an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use model_tree_types::NodeIdentity;
use tokio::sync::oneshot;
use tracing::debug;

struct Slot {
    ticket: u64,
    cancel: oneshot::Sender<()>,
}

#[derive(Default)]
pub struct RequestCoordinator {
    slots: Mutex<HashMap<NodeIdentity, Slot>>,
    next_ticket: AtomicU64,
}

impl std::fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl RequestCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<NodeIdentity, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `identity`, superseding whoever held it.
    pub fn begin(self: &Arc<Self>, identity: NodeIdentity) -> RequestTicket {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let (cancel, cancelled) = oneshot::channel();
        let previous = self
            .lock()
            .insert(identity.clone(), Slot { ticket, cancel });
        if let Some(previous) = previous {
            let _ = previous.cancel.send(());
            debug!(
                kind = identity.key.kind_name(),
                depth = identity.depth,
                superseded = previous.ticket,
                by = ticket,
                "Request superseded"
            );
        }
        RequestTicket {
            coordinator: self.clone(),
            identity,
            ticket,
            cancelled: Some(cancelled),
        }
    }

    /// Cancel every in-flight request.
    pub fn cancel_all(&self) {
        let slots = std::mem::take(&mut *self.lock());
        if !slots.is_empty() {
            debug!(requests = slots.len(), "Cancelling all in-flight requests");
        }
        for slot in slots.into_values() {
            let _ = slot.cancel.send(());
        }
    }

    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, identity: &NodeIdentity, ticket: u64) {
        let mut slots = self.lock();
        if slots.get(identity).is_some_and(|slot| slot.ticket == ticket) {
            slots.remove(identity);
        }
    }
}

/// Holder of one identity slot. Dropping it frees the slot unless a newer
/// request already took it over.
pub struct RequestTicket {
    coordinator: Arc<RequestCoordinator>,
    identity: NodeIdentity,
    ticket: u64,
    cancelled: Option<oneshot::Receiver<()>>,
}

impl std::fmt::Debug for RequestTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTicket")
            .field("identity", &self.identity)
            .field("ticket", &self.ticket)
            .finish()
    }
}

impl RequestTicket {
    /// Resolves once a newer request for the same identity starts or the
    /// coordinator cancels everything.
    ///
    /// Meant to be raced once, inside `select!`.
    pub async fn superseded(&mut self) {
        match self.cancelled.take() {
            // A dropped sender means the slot was torn down: also cancelled.
            Some(cancelled) => {
                let _ = cancelled.await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// True while no newer request has taken the slot.
    pub fn is_current(&self) -> bool {
        self.coordinator
            .lock()
            .get(&self.identity)
            .is_some_and(|slot| slot.ticket == self.ticket)
    }
}

impl Drop for RequestTicket {
    fn drop(&mut self) {
        self.coordinator.release(&self.identity, self.ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_tree_types::{HierarchyNode, Id64};
    use std::time::Duration;

    fn identity(depth: usize) -> NodeIdentity {
        HierarchyNode::model(vec![Id64(1)]).at_depth(depth).identity()
    }

    #[tokio::test]
    async fn test_newer_request_supersedes_older() {
        let coordinator = RequestCoordinator::new();
        let mut first = coordinator.begin(identity(1));
        let second = coordinator.begin(identity(1));
        tokio::time::timeout(Duration::from_secs(1), first.superseded())
            .await
            .expect("first request should be superseded");
        assert!(!first.is_current());
        assert!(second.is_current());
    }

    #[tokio::test]
    async fn test_other_depth_is_independent() {
        let coordinator = RequestCoordinator::new();
        let mut shallow = coordinator.begin(identity(1));
        let _deep = coordinator.begin(identity(2));
        assert!(shallow.is_current());
        let raced = tokio::time::timeout(Duration::from_millis(10), shallow.superseded()).await;
        assert!(raced.is_err());
        assert_eq!(coordinator.in_flight(), 2);
    }

    #[test]
    fn test_stale_drop_keeps_newer_slot() {
        let coordinator = RequestCoordinator::new();
        let first = coordinator.begin(identity(1));
        let second = coordinator.begin(identity(1));
        drop(first);
        assert_eq!(coordinator.in_flight(), 1);
        assert!(second.is_current());
        drop(second);
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let coordinator = RequestCoordinator::new();
        let mut a = coordinator.begin(identity(1));
        let mut b = coordinator.begin(identity(2));
        coordinator.cancel_all();
        a.superseded().await;
        b.superseded().await;
        assert_eq!(coordinator.in_flight(), 0);
    }
}
