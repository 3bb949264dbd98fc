//! Endpoint registry and inbound message routing.
//!
//! The dispatcher owns the name→endpoint table and a bounded pool of worker
//! tasks. Inboxes with pending work are pushed onto a ready queue; each
//! worker pops one, drains it to empty and moves on. Combined with the
//! inbox `active` flag this gives strict FIFO within an endpoint and
//! bounded concurrency across endpoints.

use crate::error::RpcError;
use crate::rpc::address::RpcAddress;
use crate::rpc::endpoint::RpcEndpoint;
use crate::rpc::inbox::{Inbox, PostOutcome};
use crate::rpc::message::{InboxMessage, ReplySender};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

pub(crate) struct Dispatcher {
    endpoints: DashMap<String, Arc<Inbox>>,
    ready_tx: mpsc::UnboundedSender<Arc<Inbox>>,
    stopped: AtomicBool,
    dropped_messages: AtomicU64,
}

impl Dispatcher {
    /// Create a dispatcher and spawn its worker pool. Must be called from
    /// within a tokio runtime.
    pub(crate) fn new(workers: usize) -> Arc<Self> {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel::<Arc<Inbox>>();
        let ready_rx = Arc::new(Mutex::new(ready_rx));
        for _ in 0..workers.max(1) {
            let ready_rx = ready_rx.clone();
            tokio::spawn(async move {
                loop {
                    let inbox = { ready_rx.lock().await.recv().await };
                    match inbox {
                        Some(inbox) => inbox.process().await,
                        None => break,
                    }
                }
            });
        }
        Arc::new(Self {
            endpoints: DashMap::new(),
            ready_tx,
            stopped: AtomicBool::new(false),
            dropped_messages: AtomicU64::new(0),
        })
    }

    /// Register an endpoint under a unique name.
    pub(crate) fn register(
        &self,
        name: &str,
        endpoint: Arc<dyn RpcEndpoint>,
    ) -> Result<(), RpcError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(RpcError::EnvironmentStopped);
        }
        use dashmap::mapref::entry::Entry;
        match self.endpoints.entry(name.to_string()) {
            Entry::Occupied(_) => Err(RpcError::DuplicateName(name.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(Inbox::new(name.to_string(), endpoint));
                Ok(())
            }
        }
    }

    /// Whether an endpoint with this name is currently registered.
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.endpoints.contains_key(name)
    }

    /// Unregister an endpoint: the inbox stops accepting messages, queued
    /// asks fail with `EndpointStopped` and `on_stop` runs after the drain.
    pub(crate) fn unregister(&self, name: &str) {
        if let Some((_, inbox)) = self.endpoints.remove(name) {
            inbox.stop();
            let endpoint = inbox.endpoint().clone();
            tokio::spawn(async move { endpoint.on_stop().await });
        }
    }

    /// Deliver a fire-and-forget message. Never blocks; if the receiver is
    /// gone (possibly unregistered concurrently) the message is counted and
    /// dropped.
    pub(crate) fn post_one_way(&self, receiver: &str, message: InboxMessage) {
        let Some(inbox) = self.endpoints.get(receiver).map(|entry| entry.clone()) else {
            self.count_drop(receiver);
            return;
        };
        match inbox.post(message) {
            PostOutcome::EnqueuedNeedsScheduling => self.schedule(inbox),
            PostOutcome::Enqueued => {}
            PostOutcome::Stopped(_) => self.count_drop(receiver),
        }
    }

    /// Deliver a request and return the receiver half of its reply channel.
    /// Fails synchronously when the endpoint is unknown or stopped.
    pub(crate) fn post_and_ask(
        &self,
        receiver: &str,
        sender: RpcAddress,
        payload: Bytes,
    ) -> Result<oneshot::Receiver<Result<Bytes, RpcError>>, RpcError> {
        let inbox = self
            .endpoints
            .get(receiver)
            .map(|entry| entry.clone())
            .ok_or_else(|| RpcError::EndpointNotFound(receiver.to_string()))?;
        let (reply_tx, reply_rx): (ReplySender, _) = oneshot::channel();
        match inbox.post(InboxMessage::Rpc {
            sender,
            payload,
            reply: reply_tx,
        }) {
            PostOutcome::EnqueuedNeedsScheduling => {
                self.schedule(inbox);
                Ok(reply_rx)
            }
            PostOutcome::Enqueued => Ok(reply_rx),
            PostOutcome::Stopped(_) => Err(RpcError::EndpointStopped(receiver.to_string())),
        }
    }

    /// Stop the registry: every endpoint is unregistered and every queued
    /// ask fails. Idempotent.
    pub(crate) fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let names: Vec<String> = self
            .endpoints
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for name in names {
            self.unregister(&name);
        }
    }

    /// Messages dropped because their receiver was gone.
    pub(crate) fn dropped_messages(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    fn schedule(&self, inbox: Arc<Inbox>) {
        if self.ready_tx.send(inbox).is_err() {
            tracing::warn!("dispatcher worker pool is gone; inbox not scheduled");
        }
    }

    fn count_drop(&self, receiver: &str) {
        self.dropped_messages.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(endpoint = receiver, "dropping message for absent endpoint");
    }
}
