//! Configuration for an RPC environment.

use std::time::Duration;

/// Tunables for an [`RpcEnv`](crate::rpc::env::RpcEnv).
///
/// The defaults are intended for control-plane traffic: generous ask
/// timeouts, a small bounded dispatcher pool and a handful of connection
/// retries before a destination is declared unreachable.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Default deadline for `ask` calls when the caller does not supply one.
    pub ask_timeout: Duration,

    /// Maximum consecutive connection-establishment attempts per outbox
    /// before its whole queue is failed and the outbox torn down.
    pub connect_max_retries: u32,

    /// Wait between connection-establishment attempts.
    pub connect_retry_wait: Duration,

    /// Number of worker tasks draining endpoint inboxes. Parallelism across
    /// endpoints is bounded by this; within one endpoint processing is
    /// always serial.
    pub dispatcher_workers: usize,

    /// Maximum id-disambiguation attempts on worker registration collision.
    pub max_registration_attempts: u32,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            ask_timeout: Duration::from_secs(30),
            connect_max_retries: 3,
            connect_retry_wait: Duration::from_millis(100),
            dispatcher_workers: 4,
            max_registration_attempts: 16,
        }
    }
}

impl RpcConfig {
    /// Replace the default ask deadline.
    pub fn with_ask_timeout(mut self, timeout: Duration) -> Self {
        self.ask_timeout = timeout;
        self
    }

    /// Replace the connection retry bounds.
    pub fn with_connect_retries(mut self, max_retries: u32, retry_wait: Duration) -> Self {
        self.connect_max_retries = max_retries;
        self.connect_retry_wait = retry_wait;
        self
    }

    /// Replace the dispatcher worker count.
    pub fn with_dispatcher_workers(mut self, workers: usize) -> Self {
        self.dispatcher_workers = workers.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RpcConfig::default();
        assert_eq!(config.ask_timeout, Duration::from_secs(30));
        assert_eq!(config.connect_max_retries, 3);
        assert_eq!(config.dispatcher_workers, 4);
    }

    #[test]
    fn test_builders() {
        let config = RpcConfig::default()
            .with_ask_timeout(Duration::from_secs(5))
            .with_connect_retries(1, Duration::from_millis(10))
            .with_dispatcher_workers(0);
        assert_eq!(config.ask_timeout, Duration::from_secs(5));
        assert_eq!(config.connect_max_retries, 1);
        // Worker count is clamped to at least one.
        assert_eq!(config.dispatcher_workers, 1);
    }
}
