//! Network identity types for processes and endpoints.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable `(host, port)` identity of a process's listening endpoint.
///
/// Equality is by value; two refs pointing at the same `host:port` address
/// the same process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RpcAddress {
    /// Hostname or IP the process listens on.
    pub host: String,
    /// Listening port.
    pub port: u16,
}

impl RpcAddress {
    /// Create an address from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse an address from `host:port` form.
    pub fn parse(s: &str) -> Option<Self> {
        let (host, port) = s.rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        let port = port.parse().ok()?;
        Some(Self::new(host, port))
    }

    /// The `host:port` form.
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for RpcAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Globally unique identity of a named endpoint: the endpoint name plus the
/// address of the process hosting it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointAddress {
    /// Endpoint name, unique within its process.
    pub name: String,
    /// Address of the hosting process.
    pub address: RpcAddress,
}

impl EndpointAddress {
    /// Create an endpoint address.
    pub fn new(name: impl Into<String>, address: RpcAddress) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.address)
    }
}
