//! Transport boundary consumed by the RPC layer.
//!
//! The messaging core does not know about framing, TLS or socket details.
//! It requires only:
//!
//! - [`Transport`]: open or reuse connections to an address, and bind a
//!   listening address to an [`InboundHandler`].
//! - [`Connection`]: deliver one byte payload, report success or failure.
//! - [`InboundHandler`]: the environment-side sink for inbound frames.
//!
//! Outboxes classify [`TransportError`]s via [`TransportError::is_transient`]:
//! transient failures trigger reconnection with the queue intact, permanent
//! ones fail the affected message only.

pub mod memory;

use crate::rpc::address::RpcAddress;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by a transport implementation.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// A connection to the address could not be established.
    #[error("Failed to connect to {address}: {reason}")]
    ConnectFailed {
        /// Destination that refused or timed out.
        address: String,
        /// Implementation-specific reason.
        reason: String,
    },

    /// The connection was closed before or during the send.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The destination is currently unreachable. Transient.
    #[error("Destination unreachable: {0}")]
    Unreachable(String),

    /// A send failed for an implementation-specific reason.
    #[error("Send failed: {reason}")]
    SendFailed {
        /// Implementation-specific reason.
        reason: String,
        /// Whether retrying over a fresh connection may succeed.
        transient: bool,
    },

    /// The listening address is already bound.
    #[error("Address already bound: {0}")]
    AlreadyBound(String),

    /// The transport has not been bound to a local address yet.
    #[error("Transport not bound to a local address")]
    NotBound,
}

impl TransportError {
    /// Whether the failure is worth a bounded reconnect-and-retry with the
    /// outbound queue intact.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::ConnectionClosed | TransportError::Unreachable(_) => true,
            TransportError::SendFailed { transient, .. } => *transient,
            TransportError::ConnectFailed { .. } => true,
            TransportError::AlreadyBound(_) | TransportError::NotBound => false,
        }
    }
}

/// A single established connection to a remote address.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Deliver one payload. Resolves once the transport has accepted the
    /// frame for delivery, with failure reported per frame.
    async fn send(&self, bytes: Bytes) -> Result<(), TransportError>;

    /// Close the connection. Subsequent sends fail with
    /// [`TransportError::ConnectionClosed`].
    fn close(&self);

    /// Whether the connection is still usable.
    fn is_open(&self) -> bool;
}

/// Environment-side sink for inbound frames.
pub trait InboundHandler: Send + Sync {
    /// Deliver a raw inbound frame. `from` is the transport-level peer
    /// address and is used for diagnostics only; routing context lives in
    /// the frame itself.
    fn handle_inbound(&self, from: RpcAddress, bytes: Bytes);
}

/// Connection factory plus listening side of a process.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a connection to a remote address.
    async fn connect(&self, address: &RpcAddress) -> Result<Arc<dyn Connection>, TransportError>;

    /// Bind the local listening address and route inbound frames to
    /// `handler`.
    fn bind(
        &self,
        address: &RpcAddress,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<(), TransportError>;

    /// Stop accepting inbound traffic and release resources. Idempotent.
    fn close(&self);
}
