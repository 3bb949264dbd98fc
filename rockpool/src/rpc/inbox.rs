//! Per-endpoint FIFO inbox.
//!
//! An inbox owns the pending messages for one endpoint plus an `active`
//! flag. The flag is the single-concurrency guarantee: a worker that flips
//! it from false to true owns the inbox until the queue drains, so two
//! messages for the same endpoint are never processed concurrently and are
//! processed in enqueue order.

use crate::error::RpcError;
use crate::rpc::endpoint::RpcEndpoint;
use crate::rpc::message::InboxMessage;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub(crate) struct Inbox {
    name: String,
    endpoint: Arc<dyn RpcEndpoint>,
    inner: Mutex<InboxInner>,
}

struct InboxInner {
    queue: VecDeque<InboxMessage>,
    /// True while a dispatcher worker owns this inbox.
    active: bool,
    /// Set by `stop()`; no new messages are accepted afterwards.
    stopped: bool,
}

/// Outcome of posting a message to an inbox.
pub(crate) enum PostOutcome {
    /// Enqueued; the inbox was idle and needs scheduling onto the pool.
    EnqueuedNeedsScheduling,
    /// Enqueued; a worker already owns the inbox and will pick it up.
    Enqueued,
    /// The inbox was stopped; the message is handed back to the caller.
    Stopped(InboxMessage),
}

impl Inbox {
    pub(crate) fn new(name: String, endpoint: Arc<dyn RpcEndpoint>) -> Arc<Self> {
        Arc::new(Self {
            name,
            endpoint,
            inner: Mutex::new(InboxInner {
                queue: VecDeque::new(),
                active: false,
                stopped: false,
            }),
        })
    }

    pub(crate) fn endpoint(&self) -> &Arc<dyn RpcEndpoint> {
        &self.endpoint
    }

    pub(crate) fn post(&self, message: InboxMessage) -> PostOutcome {
        let mut inner = self.inner.lock().expect("inbox lock poisoned");
        if inner.stopped {
            return PostOutcome::Stopped(message);
        }
        inner.queue.push_back(message);
        if inner.active {
            PostOutcome::Enqueued
        } else {
            inner.active = true;
            PostOutcome::EnqueuedNeedsScheduling
        }
    }

    /// Drain the queue. Called only by the worker that observed
    /// `EnqueuedNeedsScheduling`; releases ownership (clears `active`) under
    /// the same lock acquisition that observes the queue empty, so a
    /// concurrent `post` either sees a non-empty queue being drained or an
    /// idle inbox it must schedule.
    pub(crate) async fn process(&self) {
        loop {
            let message = {
                let mut inner = self.inner.lock().expect("inbox lock poisoned");
                if inner.stopped {
                    inner.active = false;
                    return;
                }
                match inner.queue.pop_front() {
                    Some(message) => message,
                    None => {
                        inner.active = false;
                        return;
                    }
                }
            };
            self.handle(message).await;
        }
    }

    async fn handle(&self, message: InboxMessage) {
        match message {
            InboxMessage::OneWay { sender, payload } => {
                if let Err(error) = self.endpoint.receive(sender, payload).await {
                    tracing::warn!(
                        endpoint = %self.name,
                        %error,
                        "one-way handler failed; message dropped"
                    );
                }
            }
            InboxMessage::Rpc {
                sender,
                payload,
                reply,
            } => {
                let result = self.endpoint.receive_and_reply(sender, payload).await;
                if reply.send(result).is_err() {
                    tracing::debug!(
                        endpoint = %self.name,
                        "ask caller went away before the reply was ready"
                    );
                }
            }
        }
    }

    /// Mark the inbox stopped and fail every queued ask. In-flight
    /// processing of the current message is allowed to finish.
    pub(crate) fn stop(&self) {
        let drained = {
            let mut inner = self.inner.lock().expect("inbox lock poisoned");
            if inner.stopped {
                return;
            }
            inner.stopped = true;
            std::mem::take(&mut inner.queue)
        };
        for message in drained {
            if let InboxMessage::Rpc { reply, .. } = message {
                let _ = reply.send(Err(RpcError::EndpointStopped(self.name.clone())));
            }
        }
    }
}
