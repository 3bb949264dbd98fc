//! Built-in discovery endpoint.
//!
//! Every environment registers one instance under a reserved name at
//! startup. Remote environments ask it whether a given endpoint name exists
//! before handing out refs, so resolution failures surface at setup time.

use crate::error::RpcError;
use crate::rpc::address::RpcAddress;
use crate::rpc::dispatcher::Dispatcher;
use crate::rpc::endpoint::RpcEndpoint;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Reserved name of the discovery endpoint present in every environment.
pub const VERIFIER_ENDPOINT_NAME: &str = "rockpool-endpoint-verifier";

/// Ask whether an endpoint with this name is registered. The reply is a
/// bare `bool`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckExistence {
    /// Name to look up.
    pub name: String,
}

pub(crate) struct EndpointVerifier {
    dispatcher: Arc<Dispatcher>,
}

impl EndpointVerifier {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl RpcEndpoint for EndpointVerifier {
    async fn receive_and_reply(
        &self,
        _sender: RpcAddress,
        payload: Bytes,
    ) -> Result<Bytes, RpcError> {
        let request: CheckExistence = serde_json::from_slice(&payload)
            .map_err(|e| RpcError::UnhandledMessage(e.to_string()))?;
        let exists = self.dispatcher.contains(&request.name);
        Ok(Bytes::from(serde_json::to_vec(&exists).map_err(|e| {
            RpcError::UnhandledMessage(e.to_string())
        })?))
    }
}
