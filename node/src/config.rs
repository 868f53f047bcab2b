//! Node configuration with TOML file support.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tangle_types::{Address, HASH_LENGTH};

use crate::logging::LogFormat;
use crate::NodeError;

/// Configuration for a Tangle node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address the gossip listener binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Coordinator address every neighbor must share, hex encoded.
    #[serde(default = "default_coordinator")]
    pub coordinator_address: String,

    /// Minimum weight magnitude every neighbor must share.
    #[serde(default = "default_mwm")]
    pub mwm: u8,

    /// Maximum number of connected neighbors.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,

    /// Accept handshakes from peers that are not in `known_peers`.
    #[serde(default)]
    pub accept_any_peer: bool,

    /// Neighbors (`host:port`) to dial and to accept.
    #[serde(default)]
    pub known_peers: Vec<String>,

    /// Seconds between reconnection attempts to known peers.
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,

    /// Pending requests older than this are dropped by the sweeper.
    /// Zero keeps them forever.
    #[serde(default = "default_request_discard_secs")]
    pub request_discard_older_than_secs: u64,

    /// Milliseconds between passes handing queued requests to STING
    /// neighbors.
    #[serde(default = "default_request_interval_millis")]
    pub request_interval_millis: u64,

    /// Seconds between request sweeps.
    #[serde(default = "default_request_sweep_interval_secs")]
    pub request_sweep_interval_secs: u64,

    /// Maximum number of broadcasts waiting for the fan-out loop.
    #[serde(default = "default_broadcast_queue_capacity")]
    pub broadcast_queue_capacity: usize,

    /// Maximum number of messages processed concurrently.
    #[serde(default = "default_processor_workers")]
    pub processor_workers: usize,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter, e.g. "info" or "debug,tangle_network=trace".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to keep the Prometheus registry updated.
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0:15600".to_string()
}

fn default_coordinator() -> String {
    "00".repeat(HASH_LENGTH)
}

fn default_mwm() -> u8 {
    14
}

fn default_max_peers() -> usize {
    8
}

fn default_reconnect_interval_secs() -> u64 {
    30
}

fn default_request_discard_secs() -> u64 {
    15
}

fn default_request_interval_millis() -> u64 {
    100
}

fn default_request_sweep_interval_secs() -> u64 {
    2
}

fn default_broadcast_queue_capacity() -> usize {
    tangle_network::broadcast::DEFAULT_BROADCAST_QUEUE_CAPACITY
}

fn default_processor_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        let config: Self = toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Check every field that has to be parsed before use.
    pub fn validate(&self) -> Result<(), NodeError> {
        self.bind_socket_address()?;
        self.coordinator()?;
        self.log_format()?;
        if self.request_sweep_interval_secs == 0 {
            return Err(NodeError::Config(
                "request_sweep_interval_secs must be positive".to_string(),
            ));
        }
        if self.request_interval_millis == 0 {
            return Err(NodeError::Config(
                "request_interval_millis must be positive".to_string(),
            ));
        }
        if self.broadcast_queue_capacity == 0 {
            return Err(NodeError::Config(
                "broadcast_queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_socket_address(&self) -> Result<SocketAddr, NodeError> {
        self.bind_address
            .parse()
            .map_err(|e| NodeError::Config(format!("bind_address {}: {e}", self.bind_address)))
    }

    pub fn coordinator(&self) -> Result<Address, NodeError> {
        Address::from_hex(&self.coordinator_address)
            .map_err(|e| NodeError::Config(format!("coordinator_address: {e}")))
    }

    pub fn log_format(&self) -> Result<LogFormat, NodeError> {
        self.log_format.parse()
    }

    pub fn request_discard_older_than(&self) -> Duration {
        Duration::from_secs(self.request_discard_older_than_secs)
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_millis)
    }

    pub fn request_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.request_sweep_interval_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs.max(1))
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            coordinator_address: default_coordinator(),
            mwm: default_mwm(),
            max_peers: default_max_peers(),
            accept_any_peer: false,
            known_peers: Vec::new(),
            reconnect_interval_secs: default_reconnect_interval_secs(),
            request_discard_older_than_secs: default_request_discard_secs(),
            request_interval_millis: default_request_interval_millis(),
            request_sweep_interval_secs: default_request_sweep_interval_secs(),
            broadcast_queue_capacity: default_broadcast_queue_capacity(),
            processor_workers: default_processor_workers(),
            log_format: default_log_format(),
            log_level: default_log_level(),
            enable_metrics: true,
        }
    }
}
