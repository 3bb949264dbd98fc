//! The endpoint trait implemented by message recipients.

use crate::error::RpcError;
use crate::rpc::address::RpcAddress;
use async_trait::async_trait;
use bytes::Bytes;

/// A named, address-scoped message recipient.
///
/// The dispatcher guarantees that at most one invocation runs at a time for
/// a given registered endpoint and that messages arrive in enqueue order, so
/// implementations may keep their state behind an uncontended lock.
///
/// Handler errors are routed to the originating ask (or logged for one-way
/// messages); they never affect other endpoints or the dispatcher itself.
#[async_trait]
pub trait RpcEndpoint: Send + Sync + 'static {
    /// Handle a fire-and-forget message.
    ///
    /// The default rejects the message; endpoints that only serve asks need
    /// not override it.
    async fn receive(&self, sender: RpcAddress, payload: Bytes) -> Result<(), RpcError> {
        let _ = payload;
        Err(RpcError::UnhandledMessage(format!(
            "one-way message from {} not supported",
            sender
        )))
    }

    /// Handle a request and produce the reply payload.
    ///
    /// The default rejects the request; endpoints that only accept one-way
    /// messages need not override it.
    async fn receive_and_reply(&self, sender: RpcAddress, payload: Bytes) -> Result<Bytes, RpcError> {
        let _ = payload;
        Err(RpcError::UnhandledMessage(format!(
            "ask from {} not supported",
            sender
        )))
    }

    /// Called once after the endpoint is unregistered and its inbox drained.
    async fn on_stop(&self) {}
}
