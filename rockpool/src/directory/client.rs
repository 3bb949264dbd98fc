//! Typed facade over the directory's ask protocol.
//!
//! Workers and drivers hold one of these instead of building
//! `DirectoryRequest` values by hand. Every call uses the owning
//! environment's configured ask timeout.

use crate::directory::block::{BlockId, BlockManagerId, StorageLevel};
use crate::directory::master::DirectoryRequest;
use crate::error::{DirectoryError, RpcError};
use crate::rpc::address::EndpointAddress;
use crate::rpc::endpoint_ref::RpcEndpointRef;
use std::collections::HashSet;

/// Client handle to the cluster's block directory.
#[derive(Clone, Debug)]
pub struct DirectoryClient {
    directory: RpcEndpointRef,
}

impl DirectoryClient {
    /// Wrap a ref to the directory endpoint, typically obtained via
    /// [`RpcEnv::setup_endpoint_ref`] with [`DIRECTORY_ENDPOINT_NAME`].
    ///
    /// [`RpcEnv::setup_endpoint_ref`]: crate::rpc::env::RpcEnv::setup_endpoint_ref
    /// [`DIRECTORY_ENDPOINT_NAME`]: crate::directory::master::DIRECTORY_ENDPOINT_NAME
    pub fn new(directory: RpcEndpointRef) -> Self {
        Self { directory }
    }

    /// Register this worker's block store; returns the id to use from now
    /// on, which may differ from the requested one.
    pub async fn register_worker(
        &self,
        id: BlockManagerId,
        max_on_heap: u64,
        max_off_heap: u64,
        endpoint: EndpointAddress,
    ) -> Result<BlockManagerId, RpcError> {
        let result: Result<BlockManagerId, DirectoryError> = self
            .directory
            .ask(&DirectoryRequest::RegisterWorker {
                id,
                max_on_heap,
                max_off_heap,
                endpoint,
            })
            .await?;
        Ok(result?)
    }

    /// Report a block's storage status.
    pub async fn update_block_info(
        &self,
        worker: BlockManagerId,
        block: BlockId,
        level: StorageLevel,
        mem_size: u64,
        disk_size: u64,
    ) -> Result<bool, RpcError> {
        let result: Result<bool, DirectoryError> = self
            .directory
            .ask(&DirectoryRequest::UpdateBlockInfo {
                worker,
                block,
                level,
                mem_size,
                disk_size,
            })
            .await?;
        Ok(result?)
    }

    /// Where a block currently lives. Empty when unknown.
    pub async fn get_locations(&self, block: BlockId) -> Result<HashSet<BlockManagerId>, RpcError> {
        self.directory
            .ask(&DirectoryRequest::GetLocations { block })
            .await
    }

    /// Locations for several blocks, in input order.
    pub async fn get_locations_multiple(
        &self,
        blocks: Vec<BlockId>,
    ) -> Result<Vec<HashSet<BlockManagerId>>, RpcError> {
        self.directory
            .ask(&DirectoryRequest::GetLocationsMultiple { blocks })
            .await
    }

    /// Whether any worker holds the block.
    pub async fn contains(&self, block: BlockId) -> Result<bool, RpcError> {
        Ok(!self.get_locations(block).await?.is_empty())
    }

    /// All live workers other than `worker`.
    pub async fn get_peers(
        &self,
        worker: BlockManagerId,
    ) -> Result<HashSet<BlockManagerId>, RpcError> {
        self.directory
            .ask(&DirectoryRequest::GetPeers { worker })
            .await
    }

    /// Drop an executor's worker from the directory. Returns whether it was
    /// known; removing an unknown executor is not an error.
    pub async fn remove_executor(&self, executor_id: impl Into<String>) -> Result<bool, RpcError> {
        self.directory
            .ask(&DirectoryRequest::RemoveExecutor {
                executor_id: executor_id.into(),
            })
            .await
    }

    /// Remove a block cluster-wide: holders are told to drop it and the
    /// directory entry is cleared.
    pub async fn remove_block(&self, block: BlockId) -> Result<bool, RpcError> {
        self.directory
            .ask(&DirectoryRequest::RemoveBlock { block })
            .await
    }

    /// Per-worker (max, remaining) memory in bytes.
    pub async fn memory_status(&self) -> Result<Vec<(BlockManagerId, (u64, u64))>, RpcError> {
        self.directory.ask(&DirectoryRequest::GetMemoryStatus).await
    }

    /// Whether an executor's worker holds any block.
    pub async fn has_cached_blocks(
        &self,
        executor_id: impl Into<String>,
    ) -> Result<bool, RpcError> {
        self.directory
            .ask(&DirectoryRequest::HasCachedBlocks {
                executor_id: executor_id.into(),
            })
            .await
    }

    /// Report liveness. A `false` reply means the directory does not know
    /// this worker and it should re-register.
    pub async fn heartbeat(&self, worker: BlockManagerId) -> Result<bool, RpcError> {
        self.directory
            .ask(&DirectoryRequest::Heartbeat { worker })
            .await
    }

    /// The command endpoint an executor's worker registered with.
    pub async fn executor_endpoint(
        &self,
        executor_id: impl Into<String>,
    ) -> Result<Option<EndpointAddress>, RpcError> {
        self.directory
            .ask(&DirectoryRequest::GetExecutorEndpointRef {
                executor_id: executor_id.into(),
            })
            .await
    }

    /// Stop the directory endpoint.
    pub async fn stop_directory(&self) -> Result<bool, RpcError> {
        self.directory.ask(&DirectoryRequest::StopDirectory).await
    }
}
