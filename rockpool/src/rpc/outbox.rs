//! Per-destination ordered outbound queue.
//!
//! One outbox exists per destination address, created lazily on first send.
//! A single drain task per outbox sends queued frames strictly in FIFO
//! order, one in flight at a time, over a lazily established connection.
//! Transient failures drop the cached connection and retry with the message
//! still at the head of the queue, so requeued messages are never reordered
//! relative to messages queued behind them. Distinct destinations share
//! nothing but the transport, so one dead peer never stalls another.

use crate::config::RpcConfig;
use crate::error::RpcError;
use crate::rpc::address::RpcAddress;
use crate::rpc::pending::PendingRegistry;
use crate::transport::{Connection, Transport, TransportError};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A frame queued for delivery, with enough context to fail the right
/// pending ask when delivery is impossible.
#[derive(Clone)]
pub(crate) enum OutboxMessage {
    /// Fire-and-forget frame; failures are logged, never surfaced.
    OneWay { bytes: Bytes },
    /// Frame belonging to an ask; failures fail its pending result.
    Rpc { bytes: Bytes, correlation_id: u64 },
}

impl OutboxMessage {
    fn bytes(&self) -> &Bytes {
        match self {
            OutboxMessage::OneWay { bytes } => bytes,
            OutboxMessage::Rpc { bytes, .. } => bytes,
        }
    }

    fn correlation_id(&self) -> Option<u64> {
        match self {
            OutboxMessage::OneWay { .. } => None,
            OutboxMessage::Rpc { correlation_id, .. } => Some(*correlation_id),
        }
    }
}

/// Outcome of enqueueing a message onto an outbox.
pub(crate) enum EnqueueOutcome {
    /// Accepted; the drain task will deliver it in order.
    Accepted,
    /// The outbox was stopped; the message is handed back to the caller,
    /// which may requeue it onto a fresh outbox.
    Stopped(OutboxMessage),
}

pub(crate) struct Outbox {
    address: RpcAddress,
    transport: Arc<dyn Transport>,
    pending: Arc<PendingRegistry>,
    config: RpcConfig,
    inner: Mutex<OutboxInner>,
}

struct OutboxInner {
    queue: VecDeque<OutboxMessage>,
    connection: Option<Arc<dyn Connection>>,
    /// True while a drain task owns this outbox.
    draining: bool,
    /// Set by `stop()` or retry exhaustion; enqueues are rejected afterwards.
    stopped: bool,
}

impl Outbox {
    pub(crate) fn new(
        address: RpcAddress,
        transport: Arc<dyn Transport>,
        pending: Arc<PendingRegistry>,
        config: RpcConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            address,
            transport,
            pending,
            config,
            inner: Mutex::new(OutboxInner {
                queue: VecDeque::new(),
                connection: None,
                draining: false,
                stopped: false,
            }),
        })
    }

    /// Append a message and start the drain task if none is active.
    pub(crate) fn enqueue(self: &Arc<Self>, message: OutboxMessage) -> EnqueueOutcome {
        let start_drain = {
            let mut inner = self.inner.lock().expect("outbox lock poisoned");
            if inner.stopped {
                return EnqueueOutcome::Stopped(message);
            }
            inner.queue.push_back(message);
            if inner.draining {
                false
            } else {
                inner.draining = true;
                true
            }
        };
        if start_drain {
            let outbox = self.clone();
            tokio::spawn(async move { outbox.drain().await });
        }
        EnqueueOutcome::Accepted
    }

    /// Current queue depth, for backpressure observation by callers that
    /// want to tear down a dead peer's outbox proactively.
    pub(crate) fn queue_depth(&self) -> usize {
        self.inner.lock().expect("outbox lock poisoned").queue.len()
    }

    /// Reject further enqueues, close the live connection and fail every
    /// queued ask. Closing the connection makes an in-flight send fail
    /// instead of delivering after stop has returned.
    pub(crate) fn stop(&self) {
        self.tear_down(RpcError::EnvironmentStopped);
    }

    async fn drain(self: Arc<Self>) {
        let mut connect_failures: u32 = 0;
        loop {
            let (message, cached) = {
                let mut inner = self.inner.lock().expect("outbox lock poisoned");
                if inner.stopped {
                    inner.draining = false;
                    return;
                }
                match inner.queue.front() {
                    Some(message) => (message.clone(), inner.connection.clone()),
                    None => {
                        inner.draining = false;
                        return;
                    }
                }
            };

            let connection = match cached.filter(|conn| conn.is_open()) {
                Some(conn) => conn,
                None => match self.connect_with_retries().await {
                    Ok(conn) => {
                        let mut inner = self.inner.lock().expect("outbox lock poisoned");
                        if inner.stopped {
                            inner.draining = false;
                            return;
                        }
                        inner.connection = Some(conn.clone());
                        conn
                    }
                    Err(error) => {
                        tracing::error!(
                            destination = %self.address,
                            %error,
                            "connection retries exhausted; failing outbox queue"
                        );
                        self.tear_down(RpcError::Transport(error));
                        return;
                    }
                },
            };

            match connection.send(message.bytes().clone()).await {
                Ok(()) => {
                    connect_failures = 0;
                    let mut inner = self.inner.lock().expect("outbox lock poisoned");
                    inner.queue.pop_front();
                }
                Err(error) if error.is_transient() => {
                    connect_failures += 1;
                    tracing::debug!(
                        destination = %self.address,
                        %error,
                        attempt = connect_failures,
                        "transient send failure; reconnecting with queue intact"
                    );
                    if connect_failures > self.config.connect_max_retries {
                        self.tear_down(RpcError::Transport(error));
                        return;
                    }
                    let mut inner = self.inner.lock().expect("outbox lock poisoned");
                    inner.connection = None;
                    // The failed message stays at the head; order holds
                    // across the reconnect.
                }
                Err(error) => {
                    tracing::warn!(
                        destination = %self.address,
                        %error,
                        "permanent send failure; failing this message only"
                    );
                    {
                        let mut inner = self.inner.lock().expect("outbox lock poisoned");
                        inner.queue.pop_front();
                    }
                    if let Some(id) = message.correlation_id() {
                        self.pending.fail(id, RpcError::Transport(error));
                    }
                }
            }
        }
    }

    async fn connect_with_retries(&self) -> Result<Arc<dyn Connection>, TransportError> {
        let mut attempt: u32 = 0;
        loop {
            if self.inner.lock().expect("outbox lock poisoned").stopped {
                return Err(TransportError::ConnectionClosed);
            }
            match self.transport.connect(&self.address).await {
                Ok(conn) => return Ok(conn),
                Err(error) => {
                    attempt += 1;
                    if attempt >= self.config.connect_max_retries {
                        return Err(error);
                    }
                    tracing::debug!(
                        destination = %self.address,
                        %error,
                        attempt,
                        "connect failed; retrying"
                    );
                    tokio::time::sleep(self.config.connect_retry_wait).await;
                }
            }
        }
    }

    fn tear_down(&self, error: RpcError) {
        let (drained, connection) = {
            let mut inner = self.inner.lock().expect("outbox lock poisoned");
            if inner.stopped {
                return;
            }
            inner.stopped = true;
            inner.draining = false;
            (std::mem::take(&mut inner.queue), inner.connection.take())
        };
        if let Some(conn) = connection {
            conn.close();
        }
        for message in drained {
            if let Some(id) = message.correlation_id() {
                self.pending.fail(id, error.clone());
            }
        }
    }
}
