//! In-process transport for tests and demos.
//!
//! A [`MemoryNetwork`] is a little cluster fabric: every environment binds a
//! [`MemoryTransport`] to it, connections deliver frames by invoking the
//! destination's inbound handler directly, and the network records the order
//! frames hit the "wire" so tests can assert delivery order.
//!
//! Failure injection: [`MemoryNetwork::set_reachable`] makes an address
//! unreachable, which fails both connection establishment and in-flight
//! sends with the transient errors an outbox is expected to retry through.

use crate::rpc::address::RpcAddress;
use crate::transport::{Connection, InboundHandler, Transport, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Shared in-process fabric connecting any number of [`MemoryTransport`]s.
pub struct MemoryNetwork {
    handlers: DashMap<RpcAddress, Arc<dyn InboundHandler>>,
    unreachable: DashMap<RpcAddress, ()>,
    wire_log: Mutex<Vec<(RpcAddress, Bytes)>>,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: DashMap::new(),
            unreachable: DashMap::new(),
            wire_log: Mutex::new(Vec::new()),
        })
    }

    /// Create a transport endpoint attached to this network.
    pub fn transport(self: &Arc<Self>) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport {
            network: self.clone(),
            local: Mutex::new(None),
        })
    }

    /// Toggle reachability of an address. Unreachable addresses refuse new
    /// connections and fail in-flight sends transiently.
    pub fn set_reachable(&self, address: &RpcAddress, reachable: bool) {
        if reachable {
            self.unreachable.remove(address);
        } else {
            self.unreachable.insert(address.clone(), ());
        }
    }

    /// Frames delivered to `destination`, in wire order.
    pub fn wire_log(&self, destination: &RpcAddress) -> Vec<Bytes> {
        self.wire_log
            .lock()
            .expect("wire log lock poisoned")
            .iter()
            .filter(|(dest, _)| dest == destination)
            .map(|(_, bytes)| bytes.clone())
            .collect()
    }

    fn is_reachable(&self, address: &RpcAddress) -> bool {
        !self.unreachable.contains_key(address)
    }

    fn deliver(
        &self,
        from: &RpcAddress,
        to: &RpcAddress,
        bytes: Bytes,
    ) -> Result<(), TransportError> {
        if !self.is_reachable(to) {
            return Err(TransportError::Unreachable(to.to_string()));
        }
        let handler = self
            .handlers
            .get(to)
            .ok_or_else(|| TransportError::Unreachable(to.to_string()))?
            .clone();
        self.wire_log
            .lock()
            .expect("wire log lock poisoned")
            .push((to.clone(), bytes.clone()));
        handler.handle_inbound(from.clone(), bytes);
        Ok(())
    }
}

/// One process's attachment point to a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: Arc<MemoryNetwork>,
    local: Mutex<Option<RpcAddress>>,
}

impl MemoryTransport {
    fn local_address(&self) -> Result<RpcAddress, TransportError> {
        self.local
            .lock()
            .expect("local address lock poisoned")
            .clone()
            .ok_or(TransportError::NotBound)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, address: &RpcAddress) -> Result<Arc<dyn Connection>, TransportError> {
        let from = self.local_address()?;
        if !self.network.is_reachable(address) || !self.network.handlers.contains_key(address) {
            return Err(TransportError::ConnectFailed {
                address: address.to_string(),
                reason: "no listener reachable".to_string(),
            });
        }
        Ok(Arc::new(MemoryConnection {
            network: self.network.clone(),
            from,
            to: address.clone(),
            open: AtomicBool::new(true),
        }))
    }

    fn bind(
        &self,
        address: &RpcAddress,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<(), TransportError> {
        use dashmap::mapref::entry::Entry;
        match self.network.handlers.entry(address.clone()) {
            Entry::Occupied(_) => Err(TransportError::AlreadyBound(address.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(handler);
                *self.local.lock().expect("local address lock poisoned") = Some(address.clone());
                Ok(())
            }
        }
    }

    fn close(&self) {
        if let Some(address) = self
            .local
            .lock()
            .expect("local address lock poisoned")
            .take()
        {
            self.network.handlers.remove(&address);
        }
    }
}

struct MemoryConnection {
    network: Arc<MemoryNetwork>,
    from: RpcAddress,
    to: RpcAddress,
    open: AtomicBool,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&self, bytes: Bytes) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        self.network.deliver(&self.from, &self.to, bytes)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
