//! Wire envelope and dispatcher-internal message types.
//!
//! The envelope is the protocol catalogue two cooperating processes agree
//! on: a tagged kind, routing fields and an opaque payload. Payload encoding
//! belongs to the communicating endpoints; the envelope only carries bytes.

use crate::error::RpcError;
use crate::rpc::address::RpcAddress;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Discriminant of a wire frame.
///
/// Unrecognized tags deserialize to [`MessageKind::Unknown`] so that a newer
/// peer can introduce kinds without breaking older processes; receivers log
/// and drop unknown frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Fire-and-forget delivery to a named endpoint.
    OneWay,
    /// Request expecting a correlated reply.
    Rpc,
    /// Successful reply to an earlier `Rpc` frame.
    Reply,
    /// Failed reply; payload carries the error text.
    ReplyFailure,
    /// Forward-compatibility arm for tags this build does not know.
    #[serde(other)]
    Unknown,
}

/// One frame on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkMessage {
    /// Frame discriminant.
    pub kind: MessageKind,
    /// Listening address of the sending environment; replies route here.
    pub sender_address: RpcAddress,
    /// Name of the receiving endpoint. Empty for reply frames, which route
    /// by correlation id instead.
    pub receiver_name: String,
    /// Correlation id tying a reply to its pending ask. Present on `Rpc`,
    /// `Reply` and `ReplyFailure` frames.
    pub correlation_id: Option<u64>,
    /// Endpoint-level payload, opaque to the substrate.
    pub payload: Vec<u8>,
}

impl NetworkMessage {
    /// Build a fire-and-forget frame.
    pub fn one_way(sender: RpcAddress, receiver_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::OneWay,
            sender_address: sender,
            receiver_name: receiver_name.into(),
            correlation_id: None,
            payload,
        }
    }

    /// Build a request frame expecting a correlated reply.
    pub fn rpc(
        sender: RpcAddress,
        receiver_name: impl Into<String>,
        correlation_id: u64,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            kind: MessageKind::Rpc,
            sender_address: sender,
            receiver_name: receiver_name.into(),
            correlation_id: Some(correlation_id),
            payload,
        }
    }

    /// Build a successful reply frame.
    pub fn reply(sender: RpcAddress, correlation_id: u64, payload: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::Reply,
            sender_address: sender,
            receiver_name: String::new(),
            correlation_id: Some(correlation_id),
            payload,
        }
    }

    /// Build a failed reply frame carrying the error text as payload.
    pub fn reply_failure(sender: RpcAddress, correlation_id: u64, payload: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::ReplyFailure,
            sender_address: sender,
            receiver_name: String::new(),
            correlation_id: Some(correlation_id),
            payload,
        }
    }
}

/// Channel half used to complete a pending ask.
pub(crate) type ReplySender = oneshot::Sender<Result<Bytes, RpcError>>;

/// Dispatcher-internal unit of work queued into an endpoint's inbox.
pub(crate) enum InboxMessage {
    /// Fire-and-forget message.
    OneWay {
        /// Address of the sending environment.
        sender: RpcAddress,
        /// Endpoint-level payload.
        payload: Bytes,
    },
    /// Request carrying a reply channel.
    Rpc {
        /// Address of the sending environment.
        sender: RpcAddress,
        /// Endpoint-level payload.
        payload: Bytes,
        /// Completion channel for the pending ask.
        reply: ReplySender,
    },
}
