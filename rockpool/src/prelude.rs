//! Common imports for rockpool applications.

pub use crate::config::RpcConfig;
pub use crate::directory::block::{
    BlockId, BlockManagerId, BlockStatus, BlockStoreFlags, StorageLevel,
};
pub use crate::directory::client::DirectoryClient;
pub use crate::directory::master::{
    BlockDirectoryEndpoint, DirectoryRequest, WorkerCommand, DIRECTORY_ENDPOINT_NAME,
};
pub use crate::error::{DirectoryError, RpcError};
pub use crate::rpc::address::{EndpointAddress, RpcAddress};
pub use crate::rpc::endpoint::RpcEndpoint;
pub use crate::rpc::endpoint_ref::RpcEndpointRef;
pub use crate::rpc::env::RpcEnv;
pub use crate::serialization::{JsonSerializer, Serializer};
pub use crate::transport::memory::MemoryNetwork;
pub use crate::transport::Transport;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
pub use std::sync::Arc;
pub use std::time::Duration;

/// Result alias using the crate's RPC error type.
pub type Result<T> = std::result::Result<T, RpcError>;
