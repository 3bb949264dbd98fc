//! Actor-style RPC: named endpoints, location-transparent refs and ordered
//! delivery between environments.

pub mod address;
pub mod endpoint;
pub mod endpoint_ref;
pub mod env;
pub mod message;
pub mod verifier;

pub(crate) mod dispatcher;
pub(crate) mod inbox;
pub(crate) mod outbox;
pub(crate) mod pending;
