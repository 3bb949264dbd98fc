//! Cluster block-location directory: one coordinator endpoint tracking
//! which workers hold which blocks, plus a typed client for talking to it.

pub mod block;
pub mod client;
pub mod master;
