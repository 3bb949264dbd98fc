//! The coordinator-side block directory endpoint.
//!
//! The directory is the sole source of truth for "where is block X":
//! workers report what they store, callers ask for locations, and nobody
//! queries workers directly. All state is mutated inside the endpoint's
//! single-concurrency inbox, so `DirectoryState` needs no internal locking
//! beyond the mutex that makes it shareable.

use crate::directory::block::{BlockId, BlockManagerId, BlockStatus, StorageLevel};
use crate::error::{DirectoryError, RpcError};
use crate::rpc::address::{EndpointAddress, RpcAddress};
use crate::rpc::endpoint::RpcEndpoint;
use crate::rpc::endpoint_ref::RpcEndpointRef;
use crate::rpc::env::RpcEnv;
use crate::serialization::{JsonSerializer, Serializer};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Well-known name the directory registers under at the coordinator.
pub const DIRECTORY_ENDPOINT_NAME: &str = "block-directory";

/// Wire catalogue of directory operations. Any two cooperating processes
/// must agree on these variants and their payload fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DirectoryRequest {
    /// Register a worker's block store. Replies `Result<BlockManagerId,
    /// DirectoryError>` with the (possibly disambiguated) id to use.
    RegisterWorker {
        /// Requested identity; an empty `executor_id` asks the directory to
        /// assign one.
        id: BlockManagerId,
        /// On-heap storage capacity in bytes.
        max_on_heap: u64,
        /// Off-heap storage capacity in bytes.
        max_off_heap: u64,
        /// The worker's command endpoint, target of remove fan-outs.
        endpoint: EndpointAddress,
    },
    /// Report a block's storage status on a worker. Replies `Result<bool,
    /// DirectoryError>`. An invalid level removes the membership.
    UpdateBlockInfo {
        /// Reporting worker.
        worker: BlockManagerId,
        /// Block being reported.
        block: BlockId,
        /// Storage level of the replica.
        level: StorageLevel,
        /// Bytes held in memory.
        mem_size: u64,
        /// Bytes held on disk.
        disk_size: u64,
    },
    /// Where a block lives. Replies `HashSet<BlockManagerId>`, empty when
    /// the block is unknown.
    GetLocations {
        /// Block to look up.
        block: BlockId,
    },
    /// Locations for several blocks at once. Replies
    /// `Vec<HashSet<BlockManagerId>>` in input order.
    GetLocationsMultiple {
        /// Blocks to look up.
        blocks: Vec<BlockId>,
    },
    /// All live workers other than the requester, for picking replication
    /// targets. Replies `HashSet<BlockManagerId>`.
    GetPeers {
        /// Requesting worker, excluded from the reply.
        worker: BlockManagerId,
    },
    /// Drop a worker and purge it from every location set. Replies `bool`:
    /// whether the executor was known.
    RemoveExecutor {
        /// Executor whose worker is removed.
        executor_id: String,
    },
    /// Tell every holder to drop a block and clear its entry. Replies
    /// `bool`: whether the block had any holders.
    RemoveBlock {
        /// Block to remove cluster-wide.
        block: BlockId,
    },
    /// Capacity and headroom per worker. Replies
    /// `Vec<(BlockManagerId, (u64, u64))>` of (max, remaining) bytes.
    GetMemoryStatus,
    /// Whether an executor's worker currently holds any block. Replies
    /// `bool`.
    HasCachedBlocks {
        /// Executor to check.
        executor_id: String,
    },
    /// Liveness signal from a worker. Replies `bool`: `false` means the
    /// directory does not know this worker and it should re-register.
    Heartbeat {
        /// Reporting worker.
        worker: BlockManagerId,
    },
    /// The command endpoint a worker registered with. Replies
    /// `Option<EndpointAddress>`.
    GetExecutorEndpointRef {
        /// Executor to look up.
        executor_id: String,
    },
    /// Shut the directory down; it unregisters itself. Replies `bool`.
    StopDirectory,
}

/// Fire-and-forget commands the directory sends to worker endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerCommand {
    /// Drop the local replica of a block.
    RemoveBlock {
        /// Block to drop.
        block: BlockId,
    },
}

/// Everything the coordinator tracks about one registered worker.
#[derive(Debug, Clone)]
struct WorkerInfo {
    endpoint: EndpointAddress,
    max_on_heap: u64,
    max_off_heap: u64,
    used_mem: u64,
    blocks: HashMap<BlockId, BlockStatus>,
    last_seen: Instant,
}

impl WorkerInfo {
    fn max_mem(&self) -> u64 {
        self.max_on_heap + self.max_off_heap
    }

    fn remaining_mem(&self) -> u64 {
        self.max_mem().saturating_sub(self.used_mem)
    }
}

/// The directory's authoritative state.
///
/// Invariant: a `BlockManagerId` appears in a block's location set only
/// while that worker is registered and still reports the block stored.
/// Every mutator maintains it; there is no repair path.
struct DirectoryState {
    workers: HashMap<BlockManagerId, WorkerInfo>,
    /// executor_id to full worker id, for executor-keyed lookups and
    /// registration disambiguation.
    executors: HashMap<String, BlockManagerId>,
    block_locations: HashMap<BlockId, HashSet<BlockManagerId>>,
    max_registration_attempts: u32,
}

impl DirectoryState {
    fn new(max_registration_attempts: u32) -> Self {
        Self {
            workers: HashMap::new(),
            executors: HashMap::new(),
            block_locations: HashMap::new(),
            max_registration_attempts,
        }
    }

    /// Register or re-register a worker.
    ///
    /// Re-registration with the exact same id replaces capacities and
    /// clears stale block memberships: a re-registering worker is assumed
    /// to have lost its in-memory blocks. A taken executor id gets a
    /// numeric disambiguator, bounded by the configured attempt count.
    fn register(
        &mut self,
        requested: BlockManagerId,
        max_on_heap: u64,
        max_off_heap: u64,
        endpoint: EndpointAddress,
    ) -> Result<BlockManagerId, DirectoryError> {
        if self.workers.contains_key(&requested) {
            tracing::info!(worker = %requested, "worker re-registered; clearing stale blocks");
            self.clear_worker_blocks(&requested);
            let info = self
                .workers
                .get_mut(&requested)
                .expect("checked present above");
            info.max_on_heap = max_on_heap;
            info.max_off_heap = max_off_heap;
            info.used_mem = 0;
            info.endpoint = endpoint;
            info.last_seen = Instant::now();
            return Ok(requested);
        }

        let base = if requested.executor_id.is_empty() {
            format!("worker-{}-{}", requested.host, requested.port)
        } else {
            requested.executor_id.clone()
        };
        let mut executor_id = base.clone();
        let mut attempts: u32 = 0;
        while self.executors.contains_key(&executor_id) {
            attempts += 1;
            if attempts >= self.max_registration_attempts {
                return Err(DirectoryError::RegistrationFailed { id: base, attempts });
            }
            executor_id = format!("{}-{}", base, attempts);
        }

        let id = BlockManagerId::new(executor_id.clone(), requested.host, requested.port);
        tracing::info!(worker = %id, max_on_heap, max_off_heap, "worker registered");
        self.executors.insert(executor_id, id.clone());
        self.workers.insert(
            id.clone(),
            WorkerInfo {
                endpoint,
                max_on_heap,
                max_off_heap,
                used_mem: 0,
                blocks: HashMap::new(),
                last_seen: Instant::now(),
            },
        );
        Ok(id)
    }

    /// Apply a worker's block status report.
    fn update_block(
        &mut self,
        worker: &BlockManagerId,
        block: BlockId,
        level: StorageLevel,
        mem_size: u64,
        disk_size: u64,
    ) -> Result<bool, DirectoryError> {
        let info = self
            .workers
            .get_mut(worker)
            .ok_or_else(|| DirectoryError::UnknownWorker(worker.to_string()))?;
        info.last_seen = Instant::now();

        if !level.is_valid() {
            // The worker dropped the block. Removing an absent membership
            // is a no-op success.
            if let Some(old) = info.blocks.remove(&block) {
                info.used_mem = info.used_mem.saturating_sub(old.mem_size);
            }
            self.drop_location(&block, worker);
            return Ok(true);
        }

        let status = BlockStatus {
            level,
            mem_size,
            disk_size,
        };
        let old_mem = info
            .blocks
            .insert(block.clone(), status)
            .map(|old| old.mem_size)
            .unwrap_or(0);
        info.used_mem = info.used_mem.saturating_sub(old_mem) + mem_size;
        self.block_locations
            .entry(block)
            .or_default()
            .insert(worker.clone());
        Ok(true)
    }

    fn locations(&self, block: &BlockId) -> HashSet<BlockManagerId> {
        self.block_locations.get(block).cloned().unwrap_or_default()
    }

    fn locations_multiple(&self, blocks: &[BlockId]) -> Vec<HashSet<BlockManagerId>> {
        blocks.iter().map(|block| self.locations(block)).collect()
    }

    /// All other live workers. A deregistered requester gets an empty set
    /// rather than a list of replication targets it may no longer use.
    fn peers(&self, worker: &BlockManagerId) -> HashSet<BlockManagerId> {
        if !self.workers.contains_key(worker) {
            tracing::debug!(worker = %worker, "peer query from unregistered worker ignored");
            return HashSet::new();
        }
        self.workers
            .keys()
            .filter(|id| *id != worker)
            .cloned()
            .collect()
    }

    /// Remove a worker and every location entry pointing at it.
    fn remove_executor(&mut self, executor_id: &str) -> bool {
        let Some(id) = self.executors.remove(executor_id) else {
            tracing::debug!(executor_id, "remove for unknown executor ignored");
            return false;
        };
        let info = self
            .workers
            .remove(&id)
            .expect("executor index points at a registered worker");
        for block in info.blocks.keys() {
            self.drop_location(block, &id);
        }
        tracing::info!(worker = %id, "worker removed");
        true
    }

    /// Clear a block's entry and return the command endpoints of its
    /// holders, for the remove fan-out.
    fn remove_block(&mut self, block: &BlockId) -> Vec<EndpointAddress> {
        let Some(holders) = self.block_locations.remove(block) else {
            return Vec::new();
        };
        let mut endpoints = Vec::with_capacity(holders.len());
        for id in holders {
            if let Some(info) = self.workers.get_mut(&id) {
                if let Some(old) = info.blocks.remove(block) {
                    info.used_mem = info.used_mem.saturating_sub(old.mem_size);
                }
                endpoints.push(info.endpoint.clone());
            }
        }
        endpoints
    }

    fn memory_status(&self) -> Vec<(BlockManagerId, (u64, u64))> {
        self.workers
            .iter()
            .map(|(id, info)| (id.clone(), (info.max_mem(), info.remaining_mem())))
            .collect()
    }

    fn has_cached_blocks(&self, executor_id: &str) -> bool {
        self.executors
            .get(executor_id)
            .and_then(|id| self.workers.get(id))
            .map(|info| !info.blocks.is_empty())
            .unwrap_or(false)
    }

    /// Refresh a worker's last-seen time. `false` asks it to re-register.
    fn heartbeat(&mut self, worker: &BlockManagerId) -> bool {
        match self.workers.get_mut(worker) {
            Some(info) => {
                info.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    fn executor_endpoint(&self, executor_id: &str) -> Option<EndpointAddress> {
        self.executors
            .get(executor_id)
            .and_then(|id| self.workers.get(id))
            .map(|info| info.endpoint.clone())
    }

    /// Remove every location membership of a worker, keeping its
    /// `WorkerInfo` in place. Used on re-registration.
    fn clear_worker_blocks(&mut self, id: &BlockManagerId) {
        let blocks: Vec<BlockId> = self
            .workers
            .get(id)
            .map(|info| info.blocks.keys().cloned().collect())
            .unwrap_or_default();
        for block in &blocks {
            self.drop_location(block, id);
        }
        if let Some(info) = self.workers.get_mut(id) {
            info.blocks.clear();
            info.used_mem = 0;
        }
    }

    fn drop_location(&mut self, block: &BlockId, id: &BlockManagerId) {
        if let Some(set) = self.block_locations.get_mut(block) {
            set.remove(id);
            if set.is_empty() {
                self.block_locations.remove(block);
            }
        }
    }
}

/// The directory endpoint. Construct with [`BlockDirectoryEndpoint::register`],
/// which installs it under [`DIRECTORY_ENDPOINT_NAME`].
pub struct BlockDirectoryEndpoint {
    env: RpcEnv,
    serializer: JsonSerializer,
    state: Mutex<DirectoryState>,
}

impl BlockDirectoryEndpoint {
    /// Create the directory and register it in the coordinator environment.
    pub fn register(env: &RpcEnv) -> Result<RpcEndpointRef, RpcError> {
        let endpoint = Arc::new(Self {
            env: env.clone(),
            serializer: JsonSerializer::new(),
            state: Mutex::new(DirectoryState::new(env.config().max_registration_attempts)),
        });
        env.register_endpoint(DIRECTORY_ENDPOINT_NAME, endpoint)
    }

    fn reply<T: serde::Serialize>(&self, value: &T) -> Result<Bytes, RpcError> {
        Ok(Bytes::from(self.serializer.serialize(value)?))
    }

    /// Best-effort one-way remove command to every holder. An unreachable
    /// worker is skipped, not retried here.
    fn fan_out_remove(&self, block: &BlockId, holders: Vec<EndpointAddress>) {
        for endpoint in holders {
            let holder = self.env.endpoint_ref_unchecked(endpoint);
            if let Err(error) = holder.send(&WorkerCommand::RemoveBlock {
                block: block.clone(),
            }) {
                tracing::warn!(%block, %holder, %error, "skipping unreachable block holder");
            }
        }
    }
}

#[async_trait]
impl RpcEndpoint for BlockDirectoryEndpoint {
    async fn receive_and_reply(
        &self,
        _sender: RpcAddress,
        payload: Bytes,
    ) -> Result<Bytes, RpcError> {
        let request: DirectoryRequest = self.serializer.deserialize(&payload)?;
        match request {
            DirectoryRequest::RegisterWorker {
                id,
                max_on_heap,
                max_off_heap,
                endpoint,
            } => {
                let result = self
                    .state
                    .lock()
                    .expect("directory lock poisoned")
                    .register(id, max_on_heap, max_off_heap, endpoint);
                self.reply(&result)
            }
            DirectoryRequest::UpdateBlockInfo {
                worker,
                block,
                level,
                mem_size,
                disk_size,
            } => {
                let result = self
                    .state
                    .lock()
                    .expect("directory lock poisoned")
                    .update_block(&worker, block, level, mem_size, disk_size);
                self.reply(&result)
            }
            DirectoryRequest::GetLocations { block } => {
                let locations = self
                    .state
                    .lock()
                    .expect("directory lock poisoned")
                    .locations(&block);
                self.reply(&locations)
            }
            DirectoryRequest::GetLocationsMultiple { blocks } => {
                let locations = self
                    .state
                    .lock()
                    .expect("directory lock poisoned")
                    .locations_multiple(&blocks);
                self.reply(&locations)
            }
            DirectoryRequest::GetPeers { worker } => {
                let peers = self
                    .state
                    .lock()
                    .expect("directory lock poisoned")
                    .peers(&worker);
                self.reply(&peers)
            }
            DirectoryRequest::RemoveExecutor { executor_id } => {
                let removed = self
                    .state
                    .lock()
                    .expect("directory lock poisoned")
                    .remove_executor(&executor_id);
                self.reply(&removed)
            }
            DirectoryRequest::RemoveBlock { block } => {
                let holders = self
                    .state
                    .lock()
                    .expect("directory lock poisoned")
                    .remove_block(&block);
                let had_holders = !holders.is_empty();
                self.fan_out_remove(&block, holders);
                self.reply(&had_holders)
            }
            DirectoryRequest::GetMemoryStatus => {
                let status = self
                    .state
                    .lock()
                    .expect("directory lock poisoned")
                    .memory_status();
                self.reply(&status)
            }
            DirectoryRequest::HasCachedBlocks { executor_id } => {
                let cached = self
                    .state
                    .lock()
                    .expect("directory lock poisoned")
                    .has_cached_blocks(&executor_id);
                self.reply(&cached)
            }
            DirectoryRequest::Heartbeat { worker } => {
                let known = self
                    .state
                    .lock()
                    .expect("directory lock poisoned")
                    .heartbeat(&worker);
                self.reply(&known)
            }
            DirectoryRequest::GetExecutorEndpointRef { executor_id } => {
                let endpoint = self
                    .state
                    .lock()
                    .expect("directory lock poisoned")
                    .executor_endpoint(&executor_id);
                self.reply(&endpoint)
            }
            DirectoryRequest::StopDirectory => {
                tracing::info!("block directory stopping");
                self.env.unregister_endpoint(DIRECTORY_ENDPOINT_NAME);
                self.reply(&true)
            }
        }
    }
}
