//! Identities and storage metadata for cached blocks.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical name of a cached block, e.g. `"rdd_4_1"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub String);

impl BlockId {
    /// Create a block id from any string-like name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one worker's block store: which executor it belongs to and
/// where that executor's block service listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockManagerId {
    /// Executor the store belongs to, unique per live worker.
    pub executor_id: String,
    /// Host the block service listens on.
    pub host: String,
    /// Port the block service listens on.
    pub port: u16,
}

impl BlockManagerId {
    /// Create a block manager id.
    pub fn new(executor_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            executor_id: executor_id.into(),
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for BlockManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockManagerId({}, {}:{})", self.executor_id, self.host, self.port)
    }
}

bitflags! {
    /// Where a block's bytes live and in what form.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BlockStoreFlags: u8 {
        /// Block is held in on-heap memory.
        const USE_MEMORY = 1 << 0;
        /// Block is spilled or persisted on disk.
        const USE_DISK = 1 << 1;
        /// Memory copy lives off-heap.
        const USE_OFF_HEAP = 1 << 2;
        /// Memory copy is stored as live objects, not serialized bytes.
        const DESERIALIZED = 1 << 3;
    }
}

// bitflags types do not carry serde impls; the wire form is the raw bits.
mod flag_bits {
    use super::BlockStoreFlags;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(flags: &BlockStoreFlags, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(flags.bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BlockStoreFlags, D::Error> {
        // Unknown bits from newer peers are dropped, not rejected.
        Ok(BlockStoreFlags::from_bits_truncate(u8::deserialize(d)?))
    }
}

/// How (and how many times) a block is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLevel {
    /// Storage media flags.
    #[serde(with = "flag_bits")]
    pub flags: BlockStoreFlags,
    /// Desired number of replicas across the cluster.
    pub replication: u32,
}

impl StorageLevel {
    /// Deserialized in on-heap memory, one replica.
    pub const MEMORY_ONLY: Self = Self {
        flags: BlockStoreFlags::USE_MEMORY.union(BlockStoreFlags::DESERIALIZED),
        replication: 1,
    };

    /// Serialized on disk, one replica.
    pub const DISK_ONLY: Self = Self {
        flags: BlockStoreFlags::USE_DISK,
        replication: 1,
    };

    /// Not stored anywhere. Reporting this level removes the block from the
    /// reporting worker.
    pub const NONE: Self = Self {
        flags: BlockStoreFlags::empty(),
        replication: 0,
    };

    /// A level describes an actual stored replica only if it names at least
    /// one medium and a positive replica count.
    pub fn is_valid(&self) -> bool {
        self.flags
            .intersects(BlockStoreFlags::USE_MEMORY | BlockStoreFlags::USE_DISK)
            && self.replication > 0
    }

    /// Whether the level keeps a copy in memory (on or off heap).
    pub fn uses_memory(&self) -> bool {
        self.flags
            .intersects(BlockStoreFlags::USE_MEMORY | BlockStoreFlags::USE_OFF_HEAP)
    }
}

/// A worker's report of how one block is stored there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStatus {
    /// Storage level of this replica.
    pub level: StorageLevel,
    /// Bytes held in memory.
    pub mem_size: u64,
    /// Bytes held on disk.
    pub disk_size: u64,
}
