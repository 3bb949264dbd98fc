//! The RPC environment: the facade gluing registry, outboxes, transport and
//! serialization together.
//!
//! ```text
//! caller ──▶ RpcEndpointRef.send/ask
//!                │
//!                ▼
//!            RpcEnv ── local? ──▶ Dispatcher ──▶ endpoint inbox
//!                │
//!                └── remote? ──▶ Outbox(addr) ──▶ Transport ──▶ peer env
//!                                                     │
//!                     PendingRegistry ◀── reply frame ┘
//! ```
//!
//! Deserialization context (who sent the frame, which environment received
//! it) is always passed as arguments; there is no process-global "current
//! environment" state.

use crate::config::RpcConfig;
use crate::error::RpcError;
use crate::rpc::address::{EndpointAddress, RpcAddress};
use crate::rpc::dispatcher::Dispatcher;
use crate::rpc::endpoint::RpcEndpoint;
use crate::rpc::endpoint_ref::RpcEndpointRef;
use crate::rpc::message::{InboxMessage, MessageKind, NetworkMessage};
use crate::rpc::outbox::{EnqueueOutcome, Outbox, OutboxMessage};
use crate::rpc::pending::PendingRegistry;
use crate::rpc::verifier::{CheckExistence, EndpointVerifier, VERIFIER_ENDPOINT_NAME};
use crate::serialization::{JsonSerializer, Serializer};
use crate::transport::{InboundHandler, Transport, TransportError};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Handle to an in-flight ask: the reply channel plus the correlation id to
/// release if the caller gives up first.
pub(crate) struct AskHandle {
    pub(crate) receiver: oneshot::Receiver<Result<Bytes, RpcError>>,
    pub(crate) correlation_id: Option<u64>,
}

/// One process's RPC environment.
///
/// Cheap to clone; all clones share the same underlying state. Must be
/// started from within a tokio runtime.
#[derive(Clone)]
pub struct RpcEnv {
    core: Arc<EnvCore>,
}

pub(crate) struct EnvCore {
    pub(crate) address: RpcAddress,
    pub(crate) config: RpcConfig,
    pub(crate) serializer: JsonSerializer,
    dispatcher: Arc<Dispatcher>,
    outboxes: DashMap<RpcAddress, Arc<Outbox>>,
    pending: Arc<PendingRegistry>,
    transport: Arc<dyn Transport>,
    stopped: AtomicBool,
}

struct InboundAdapter {
    core: Arc<EnvCore>,
}

impl InboundHandler for InboundAdapter {
    fn handle_inbound(&self, from: RpcAddress, bytes: Bytes) {
        self.core.handle_frame(from, bytes);
    }
}

impl RpcEnv {
    /// Start an environment: bind the listening address, spin up the
    /// dispatcher pool and register the discovery endpoint.
    pub fn start(
        address: RpcAddress,
        config: RpcConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, RpcError> {
        let dispatcher = Dispatcher::new(config.dispatcher_workers);
        let core = Arc::new(EnvCore {
            address: address.clone(),
            config,
            serializer: JsonSerializer::new(),
            dispatcher: dispatcher.clone(),
            outboxes: DashMap::new(),
            pending: Arc::new(PendingRegistry::new()),
            transport: transport.clone(),
            stopped: AtomicBool::new(false),
        });
        transport.bind(&address, Arc::new(InboundAdapter { core: core.clone() }))?;
        dispatcher.register(
            VERIFIER_ENDPOINT_NAME,
            Arc::new(EndpointVerifier::new(dispatcher.clone())),
        )?;
        tracing::debug!(%address, "RPC environment started");
        Ok(Self { core })
    }

    /// The address this environment listens on.
    pub fn address(&self) -> &RpcAddress {
        &self.core.address
    }

    /// The environment's configuration.
    pub fn config(&self) -> &RpcConfig {
        &self.core.config
    }

    /// Register an endpoint under a unique name and return its local ref.
    pub fn register_endpoint(
        &self,
        name: &str,
        endpoint: Arc<dyn RpcEndpoint>,
    ) -> Result<RpcEndpointRef, RpcError> {
        self.core.dispatcher.register(name, endpoint)?;
        Ok(RpcEndpointRef::new(
            name.to_string(),
            self.core.address.clone(),
            self.core.clone(),
        ))
    }

    /// Unregister a local endpoint. Queued asks addressed to it fail with
    /// `EndpointStopped`.
    pub fn unregister_endpoint(&self, name: &str) {
        self.core.dispatcher.unregister(name);
    }

    /// Resolve a locally registered endpoint.
    pub fn endpoint_ref(&self, name: &str) -> Result<RpcEndpointRef, RpcError> {
        if self.core.dispatcher.contains(name) {
            Ok(RpcEndpointRef::new(
                name.to_string(),
                self.core.address.clone(),
                self.core.clone(),
            ))
        } else {
            Err(RpcError::EndpointNotFound(name.to_string()))
        }
    }

    /// Resolve a remote endpoint, verifying with the remote discovery
    /// endpoint that the name exists there before handing out the ref.
    /// Fails fast on typos instead of silently queuing into a void.
    pub async fn setup_endpoint_ref(
        &self,
        address: RpcAddress,
        name: &str,
    ) -> Result<RpcEndpointRef, RpcError> {
        if address == self.core.address {
            return self.endpoint_ref(name);
        }
        let verifier = RpcEndpointRef::new(
            VERIFIER_ENDPOINT_NAME.to_string(),
            address.clone(),
            self.core.clone(),
        );
        let exists: bool = verifier
            .ask(&CheckExistence {
                name: name.to_string(),
            })
            .await?;
        if exists {
            Ok(self.endpoint_ref_unchecked(EndpointAddress::new(name, address)))
        } else {
            Err(RpcError::EndpointNotFound(format!("{}@{}", name, address)))
        }
    }

    /// Build a ref without existence verification, for callers that already
    /// know the endpoint is there (e.g. the directory fanning out to
    /// workers that registered themselves).
    pub fn endpoint_ref_unchecked(&self, endpoint: EndpointAddress) -> RpcEndpointRef {
        RpcEndpointRef::new(endpoint.name, endpoint.address, self.core.clone())
    }

    /// Tear down the outbox for a destination, failing its queued asks.
    /// Useful when a caller observes unbounded backlog to a dead peer.
    pub fn remove_outbox(&self, address: &RpcAddress) {
        if let Some((_, outbox)) = self.core.outboxes.remove(address) {
            outbox.stop();
        }
    }

    /// Queue depth of the outbox for a destination, if one exists.
    pub fn outbox_depth(&self, address: &RpcAddress) -> Option<usize> {
        self.core
            .outboxes
            .get(address)
            .map(|outbox| outbox.queue_depth())
    }

    /// Messages dropped because their receiving endpoint was gone.
    pub fn dropped_messages(&self) -> u64 {
        self.core.dispatcher.dropped_messages()
    }

    /// Shut the environment down: stop every outbox (failing their queues),
    /// stop the registry (failing endpoint asks), fail all pending results
    /// and release the transport. Idempotent.
    pub fn shutdown(&self) {
        if self.core.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(
            address = %self.core.address,
            outstanding_asks = self.core.pending.len(),
            "RPC environment shutting down"
        );
        let addresses: Vec<RpcAddress> = self
            .core
            .outboxes
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for address in addresses {
            if let Some((_, outbox)) = self.core.outboxes.remove(&address) {
                outbox.stop();
            }
        }
        self.core.dispatcher.stop();
        self.core.pending.fail_all(RpcError::EnvironmentStopped);
        self.core.transport.close();
    }
}

impl EnvCore {
    pub(crate) fn is_local(&self, address: &RpcAddress) -> bool {
        *address == self.address
    }

    /// Fire-and-forget delivery, local or remote.
    pub(crate) fn send(
        self: &Arc<Self>,
        name: &str,
        address: &RpcAddress,
        payload: Bytes,
    ) -> Result<(), RpcError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(RpcError::EnvironmentStopped);
        }
        if self.is_local(address) {
            self.dispatcher.post_one_way(
                name,
                InboxMessage::OneWay {
                    sender: self.address.clone(),
                    payload,
                },
            );
            return Ok(());
        }
        let frame = NetworkMessage::one_way(self.address.clone(), name, payload.to_vec());
        let bytes = Bytes::from(self.serializer.serialize(&frame)?);
        self.post_to_outbox(address, OutboxMessage::OneWay { bytes })
    }

    /// Two-way delivery: returns the reply channel plus the correlation id
    /// to release on timeout. Local asks route through the dispatcher inbox
    /// so they observe the same per-endpoint FIFO as remote ones.
    pub(crate) fn ask(
        self: &Arc<Self>,
        name: &str,
        address: &RpcAddress,
        payload: Bytes,
    ) -> Result<AskHandle, RpcError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(RpcError::EnvironmentStopped);
        }
        if self.is_local(address) {
            let receiver = self
                .dispatcher
                .post_and_ask(name, self.address.clone(), payload)?;
            return Ok(AskHandle {
                receiver,
                correlation_id: None,
            });
        }
        let (correlation_id, receiver) = self.pending.register();
        let frame = NetworkMessage::rpc(self.address.clone(), name, correlation_id, payload.to_vec());
        let bytes = match self.serializer.serialize(&frame) {
            Ok(bytes) => Bytes::from(bytes),
            Err(error) => {
                self.pending.release(correlation_id);
                return Err(error.into());
            }
        };
        if let Err(error) = self.post_to_outbox(
            address,
            OutboxMessage::Rpc {
                bytes,
                correlation_id,
            },
        ) {
            self.pending.release(correlation_id);
            return Err(error);
        }
        Ok(AskHandle {
            receiver,
            correlation_id: Some(correlation_id),
        })
    }

    pub(crate) fn release_pending(&self, correlation_id: u64) {
        self.pending.release(correlation_id);
    }

    /// Insert-if-absent into the outbox table, then re-check the stopped
    /// flag: a shutdown racing this call must not leave a live outbox
    /// behind. An outbox torn down by retry exhaustion stays stopped, so
    /// when enqueue hands the message back the stale entry is pruned and
    /// the enqueue retried once onto a fresh outbox.
    fn post_to_outbox(
        self: &Arc<Self>,
        address: &RpcAddress,
        message: OutboxMessage,
    ) -> Result<(), RpcError> {
        let mut message = message;
        for _ in 0..2 {
            let outbox = self
                .outboxes
                .entry(address.clone())
                .or_insert_with(|| {
                    Outbox::new(
                        address.clone(),
                        self.transport.clone(),
                        self.pending.clone(),
                        self.config.clone(),
                    )
                })
                .clone();
            if self.stopped.load(Ordering::SeqCst) {
                self.outboxes.remove(address);
                outbox.stop();
                return Err(RpcError::EnvironmentStopped);
            }
            match outbox.enqueue(message) {
                EnqueueOutcome::Accepted => return Ok(()),
                EnqueueOutcome::Stopped(handed_back) => {
                    message = handed_back;
                    self.outboxes
                        .remove_if(address, |_, existing| Arc::ptr_eq(existing, &outbox));
                }
            }
        }
        // Two stopped outboxes in a row means something is tearing this
        // destination down faster than we can requeue.
        Err(RpcError::Transport(TransportError::ConnectionClosed))
    }

    /// Inbound frame router. `from` identifies the transport-level peer and
    /// is used for diagnostics; routing context lives in the frame.
    fn handle_frame(self: &Arc<Self>, from: RpcAddress, bytes: Bytes) {
        let frame: NetworkMessage = match self.serializer.deserialize(&bytes) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(%from, %error, "undecodable inbound frame dropped");
                return;
            }
        };
        match frame.kind {
            MessageKind::OneWay => {
                self.dispatcher.post_one_way(
                    &frame.receiver_name,
                    InboxMessage::OneWay {
                        sender: frame.sender_address,
                        payload: Bytes::from(frame.payload),
                    },
                );
            }
            MessageKind::Rpc => {
                let Some(correlation_id) = frame.correlation_id else {
                    tracing::warn!(%from, "rpc frame without correlation id dropped");
                    return;
                };
                let reply_to = frame.sender_address.clone();
                match self.dispatcher.post_and_ask(
                    &frame.receiver_name,
                    frame.sender_address,
                    Bytes::from(frame.payload),
                ) {
                    Ok(receiver) => {
                        let core = self.clone();
                        tokio::spawn(async move {
                            let result = match receiver.await {
                                Ok(result) => result,
                                Err(_) => Err(RpcError::ReplyDropped),
                            };
                            core.send_reply(reply_to, correlation_id, result);
                        });
                    }
                    Err(error) => {
                        self.send_reply(reply_to, correlation_id, Err(error));
                    }
                }
            }
            MessageKind::Reply => {
                let Some(correlation_id) = frame.correlation_id else {
                    tracing::warn!(%from, "reply frame without correlation id dropped");
                    return;
                };
                self.pending
                    .complete(correlation_id, Ok(Bytes::from(frame.payload)));
            }
            MessageKind::ReplyFailure => {
                let Some(correlation_id) = frame.correlation_id else {
                    tracing::warn!(%from, "reply frame without correlation id dropped");
                    return;
                };
                let text: String = self
                    .serializer
                    .deserialize(&frame.payload)
                    .unwrap_or_else(|_| "unintelligible remote failure".to_string());
                self.pending
                    .fail(correlation_id, RpcError::RemoteFailure(text));
            }
            MessageKind::Unknown => {
                tracing::warn!(%from, "frame with unrecognized kind dropped");
            }
        }
    }

    /// Serialize a handler result as a reply frame and route it back to the
    /// asking environment through that address's outbox.
    fn send_reply(
        self: &Arc<Self>,
        to: RpcAddress,
        correlation_id: u64,
        result: Result<Bytes, RpcError>,
    ) {
        let frame = match result {
            Ok(payload) => NetworkMessage::reply(self.address.clone(), correlation_id, payload.to_vec()),
            Err(error) => {
                let text = error.to_string();
                match self.serializer.serialize(&text) {
                    Ok(payload) => {
                        NetworkMessage::reply_failure(self.address.clone(), correlation_id, payload)
                    }
                    Err(error) => {
                        tracing::warn!(%to, %error, "failed to encode reply failure");
                        return;
                    }
                }
            }
        };
        let bytes = match self.serializer.serialize(&frame) {
            Ok(bytes) => Bytes::from(bytes),
            Err(error) => {
                tracing::warn!(%to, %error, "failed to encode reply frame");
                return;
            }
        };
        if let Err(error) = self.post_to_outbox(&to, OutboxMessage::OneWay { bytes }) {
            tracing::warn!(%to, %error, "failed to queue reply frame");
        }
    }
}
