//! Typed handles to endpoints, local or remote.

use crate::error::RpcError;
use crate::rpc::address::RpcAddress;
use crate::rpc::env::EnvCore;
use crate::serialization::Serializer;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A reference to a named endpoint somewhere in the cluster.
///
/// Refs are cheap to clone and location transparent: `send` and `ask` work
/// the same whether the endpoint lives in this environment or a remote one.
/// Obtain refs from [`RpcEnv::register_endpoint`], [`RpcEnv::endpoint_ref`]
/// or [`RpcEnv::setup_endpoint_ref`].
///
/// [`RpcEnv::register_endpoint`]: crate::rpc::env::RpcEnv::register_endpoint
/// [`RpcEnv::endpoint_ref`]: crate::rpc::env::RpcEnv::endpoint_ref
/// [`RpcEnv::setup_endpoint_ref`]: crate::rpc::env::RpcEnv::setup_endpoint_ref
#[derive(Clone)]
pub struct RpcEndpointRef {
    name: String,
    address: RpcAddress,
    env: Arc<EnvCore>,
}

impl RpcEndpointRef {
    pub(crate) fn new(name: String, address: RpcAddress, env: Arc<EnvCore>) -> Self {
        Self { name, address, env }
    }

    /// The endpoint's registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The address of the environment hosting the endpoint.
    pub fn address(&self) -> &RpcAddress {
        &self.address
    }

    /// Whether the endpoint lives in the environment this ref came from.
    pub fn is_local(&self) -> bool {
        self.env.is_local(&self.address)
    }

    /// Fire-and-forget delivery. Returns once the message is accepted for
    /// delivery; it may still be lost if the destination dies.
    pub fn send<T: Serialize>(&self, message: &T) -> Result<(), RpcError> {
        let payload = Bytes::from(self.env.serializer.serialize(message)?);
        self.env.send(&self.name, &self.address, payload)
    }

    /// Request/response with the environment's default ask timeout.
    pub async fn ask<Req, Resp>(&self, message: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.ask_with_timeout(message, self.env.config.ask_timeout)
            .await
    }

    /// Request/response with an explicit timeout. On timeout the pending
    /// entry is released, so a reply that arrives later is discarded rather
    /// than resolving a stale future.
    pub async fn ask_with_timeout<Req, Resp>(
        &self,
        message: &Req,
        timeout: Duration,
    ) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = Bytes::from(self.env.serializer.serialize(message)?);
        let handle = self.env.ask(&self.name, &self.address, payload)?;
        let reply = match tokio::time::timeout(timeout, handle.receiver).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(RpcError::ReplyDropped),
            Err(_) => {
                if let Some(id) = handle.correlation_id {
                    self.env.release_pending(id);
                }
                return Err(RpcError::AskTimeout(timeout));
            }
        };
        Ok(self.env.serializer.deserialize(&reply)?)
    }
}

impl fmt::Debug for RpcEndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RpcEndpointRef({}@{})", self.name, self.address)
    }
}

impl fmt::Display for RpcEndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.address)
    }
}
