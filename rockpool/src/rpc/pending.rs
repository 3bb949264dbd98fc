//! Correlation of outstanding asks with their replies.
//!
//! Every remote ask allocates a fresh correlation id here and parks a
//! oneshot sender under it. Replies complete the entry exactly once; a
//! reply for an id that was already completed or timed out is discarded.

use crate::error::RpcError;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

pub(crate) struct PendingRegistry {
    next_id: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<Result<Bytes, RpcError>>>,
}

impl PendingRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
        }
    }

    /// Allocate a correlation id and register its reply channel.
    pub(crate) fn register(&self) -> (u64, oneshot::Receiver<Result<Bytes, RpcError>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        (id, rx)
    }

    /// Complete a pending ask. Late or duplicate replies are dropped with a
    /// debug log; they never resolve a stale or reused future.
    pub(crate) fn complete(&self, id: u64, result: Result<Bytes, RpcError>) {
        match self.pending.remove(&id) {
            Some((_, tx)) => {
                if tx.send(result).is_err() {
                    tracing::debug!(correlation_id = id, "ask caller went away; reply dropped");
                }
            }
            None => {
                tracing::debug!(correlation_id = id, "late reply for released id discarded");
            }
        }
    }

    /// Fail a pending ask with an error.
    pub(crate) fn fail(&self, id: u64, error: RpcError) {
        self.complete(id, Err(error));
    }

    /// Release an id without completing it (timeout path). Any reply
    /// arriving afterwards is discarded by `complete`.
    pub(crate) fn release(&self, id: u64) {
        self.pending.remove(&id);
    }

    /// Fail every outstanding ask, e.g. on environment shutdown.
    pub(crate) fn fail_all(&self, error: RpcError) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.fail(id, error.clone());
        }
    }

    /// Number of outstanding asks.
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_resolves_exactly_once() {
        let registry = PendingRegistry::new();
        let (id, rx) = registry.register();
        assert_eq!(registry.len(), 1);

        registry.complete(id, Ok(Bytes::from_static(b"reply")));
        // Second completion is a no-op discard, not a panic or overwrite.
        registry.complete(id, Ok(Bytes::from_static(b"stale")));

        let result = rx.await.unwrap().unwrap();
        assert_eq!(result, Bytes::from_static(b"reply"));
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_release_then_late_reply_is_discarded() {
        let registry = PendingRegistry::new();
        let (id, rx) = registry.register();
        registry.release(id);
        registry.complete(id, Ok(Bytes::from_static(b"late")));
        // Sender was dropped by release, so the caller observes a closed
        // channel rather than a stale value.
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_fail_all() {
        let registry = PendingRegistry::new();
        let (_, rx1) = registry.register();
        let (_, rx2) = registry.register();
        registry.fail_all(RpcError::EnvironmentStopped);
        assert!(matches!(
            rx1.await.unwrap(),
            Err(RpcError::EnvironmentStopped)
        ));
        assert!(matches!(
            rx2.await.unwrap(),
            Err(RpcError::EnvironmentStopped)
        ));
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let registry = PendingRegistry::new();
        let (a, _rx_a) = registry.register();
        let (b, _rx_b) = registry.register();
        assert_ne!(a, b);
    }
}
