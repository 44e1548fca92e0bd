//! Client Configuration
//!
//! Plain structs with defaults and builder-style setters. Nothing here reads
//! files or the environment; the binary fills a [`ClientConfig`] from its
//! command line and libraries construct one in code.

use crate::cluster::failure::FailurePolicyConfig;
use crate::cluster::locator::{Endpoint, EndpointError};
use std::time::Duration;
use thiserror::Error;

/// Errors reported by [`ClientConfig::validate`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("no servers configured")]
    NoServers,

    #[error("invalid server address: {0}")]
    InvalidServer(#[from] EndpointError),

    #[error("max pool size must be at least 1")]
    ZeroMaxPool,

    #[error("min pool size {min} exceeds max pool size {max}")]
    MinAboveMax { min: usize, max: usize },

    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("throttling policy needs at least one failure")]
    ZeroFailureThreshold,
}

/// Per-endpoint connection pool settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketPoolConfig {
    /// Connections opened eagerly when the pool starts (default: 10)
    pub min_pool_size: usize,

    /// Upper bound on open connections per endpoint (default: 20)
    pub max_pool_size: usize,

    /// TCP connect timeout (default: 10s)
    pub connection_timeout: Duration,

    /// Maximum wait for each response read (default: 10s)
    pub receive_timeout: Duration,

    /// Maximum wait for a free connection when the pool is exhausted
    /// (default: 100ms)
    pub queue_timeout: Duration,

    /// How long a dead node stays out of rotation before it is probed
    /// (default: 10s)
    pub dead_timeout: Duration,
}

impl Default for SocketPoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: 10,
            max_pool_size: 20,
            connection_timeout: Duration::from_secs(10),
            receive_timeout: Duration::from_secs(10),
            queue_timeout: Duration::from_millis(100),
            dead_timeout: Duration::from_secs(10),
        }
    }
}

impl SocketPoolConfig {
    pub fn with_pool_size(mut self, min: usize, max: usize) -> Self {
        self.min_pool_size = min;
        self.max_pool_size = max;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    pub fn with_dead_timeout(mut self, timeout: Duration) -> Self {
        self.dead_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pool_size == 0 {
            return Err(ConfigError::ZeroMaxPool);
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(ConfigError::MinAboveMax {
                min: self.min_pool_size,
                max: self.max_pool_size,
            });
        }
        for (name, value) in [
            ("connection timeout", self.connection_timeout),
            ("receive timeout", self.receive_timeout),
            ("dead timeout", self.dead_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroTimeout(name));
            }
        }
        Ok(())
    }
}

/// Top-level client settings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClientConfig {
    pub servers: Vec<Endpoint>,
    pub socket_pool: SocketPoolConfig,
    pub failure_policy: FailurePolicyConfig,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a server given as `host:port`.
    pub fn add_server(mut self, address: &str) -> Result<Self, ConfigError> {
        self.servers.push(address.parse()?);
        Ok(self)
    }

    pub fn with_servers(mut self, servers: impl IntoIterator<Item = Endpoint>) -> Self {
        self.servers.extend(servers);
        self
    }

    pub fn with_socket_pool(mut self, socket_pool: SocketPoolConfig) -> Self {
        self.socket_pool = socket_pool;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicyConfig) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::NoServers);
        }
        self.socket_pool.validate()?;
        if let FailurePolicyConfig::Throttling { max_failures: 0, .. } = self.failure_policy {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        Ok(())
    }
}
