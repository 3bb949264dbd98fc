//! # Rockpool
//!
//! An actor-style RPC substrate plus a cluster block-location directory
//! built on top of it.
//!
//! Processes host an [`RpcEnv`](rpc::env::RpcEnv) with named endpoints.
//! [`RpcEndpointRef`](rpc::endpoint_ref::RpcEndpointRef) handles are
//! location transparent: `send` fires and forgets, `ask` returns a typed
//! reply future with a timeout. Delivery is FIFO per endpoint and per
//! destination, across reconnects.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      rockpool                            │
//! │                                                          │
//! │  directory   BlockDirectoryEndpoint + DirectoryClient    │
//! │      │       (who holds which block, cluster-wide)       │
//! │      ▼                                                   │
//! │  rpc         RpcEnv · Dispatcher · Outbox · EndpointRef  │
//! │      │       (named endpoints, ordered send/ask)         │
//! │      ▼                                                   │
//! │  transport   Transport/Connection traits + MemoryNetwork │
//! │  serialization   Serializer trait + JsonSerializer       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use rockpool::prelude::*;
//!
//! let network = MemoryNetwork::new();
//! let env = RpcEnv::start(
//!     RpcAddress::new("coordinator", 7077),
//!     RpcConfig::default(),
//!     network.transport(),
//! )?;
//! let directory_ref = BlockDirectoryEndpoint::register(&env)?;
//! let client = DirectoryClient::new(directory_ref);
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod directory;
pub mod error;
pub mod prelude;
pub mod rpc;
pub mod serialization;
pub mod transport;
