//! Error types for the rockpool messaging substrate and block directory.

use crate::serialization::SerializationError;
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the RPC layer: registration, routing and delivery.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// An endpoint with this name is already registered in this environment.
    #[error("Endpoint name already registered: {0}")]
    DuplicateName(String),

    /// No endpoint with this name exists at the target environment.
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    /// The target endpoint was unregistered before the message was processed.
    #[error("Endpoint stopped: {0}")]
    EndpointStopped(String),

    /// No reply arrived within the ask deadline.
    #[error("Ask timed out after {0:?}")]
    AskTimeout(Duration),

    /// The RPC environment has been shut down.
    #[error("RPC environment stopped")]
    EnvironmentStopped,

    /// The reply channel was dropped before a response was produced.
    #[error("Reply channel dropped before a response was sent")]
    ReplyDropped,

    /// A handler on the remote side failed; carries the remote error text.
    #[error("Remote handler failed: {0}")]
    RemoteFailure(String),

    /// The payload could not be handled by the receiving endpoint.
    #[error("Unhandled message: {0}")]
    UnhandledMessage(String),

    /// Transport-level delivery failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Message (de)serialization failure. Fatal to the single message,
    /// never to the channel.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Block directory operation failure.
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
}

/// Errors raised by the block-location directory.
///
/// Serializable so directory replies can carry them across the wire as
/// values rather than flattened failure text.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum DirectoryError {
    /// A directory operation referenced a worker that is not registered.
    /// Not fatal to the directory itself.
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    /// Worker id disambiguation ran out of attempts during registration.
    #[error("Worker registration failed for {id} after {attempts} attempts")]
    RegistrationFailed {
        /// The worker id that could not be registered.
        id: String,
        /// How many disambiguation attempts were made.
        attempts: u32,
    },
}
