//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};

use crate::NodeError;

/// How block and transaction fan-out splits full payloads from hash-only
/// announcements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanoutPolicy {
    /// Every eligible peer gets the full payload.
    #[default]
    All,
    /// Roughly sqrt(n) peers get the full payload, the rest an
    /// announcement.
    Sqrt,
}

/// Configuration for a chronos node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Port to listen on for P2P connections.
    #[serde(default = "default_p2p_port")]
    pub port: u16,

    /// Maximum number of peer connections.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,

    /// Bootstrap peer addresses to connect to on startup.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    /// Block production interval in milliseconds.
    #[serde(default = "default_block_interval_ms")]
    pub block_interval_ms: u64,

    /// Fan-out split for gossip.
    #[serde(default)]
    pub fanout: FanoutPolicy,

    /// Capacity of the block broadcast queue.
    #[serde(default = "default_block_queue_capacity")]
    pub block_queue_capacity: usize,

    /// Capacity of the transaction broadcast queue.
    #[serde(default = "default_tx_queue_capacity")]
    pub tx_queue_capacity: usize,

    /// Capacity of each peer's outbound send queue.
    #[serde(default = "default_peer_send_queue_capacity")]
    pub peer_send_queue_capacity: usize,

    /// Capacity of the per-peer and node-wide known-block caches.
    #[serde(default = "default_known_block_capacity")]
    pub known_block_capacity: usize,

    /// Capacity of the per-peer and node-wide known-transaction caches.
    #[serde(default = "default_known_tx_capacity")]
    pub known_tx_capacity: usize,

    /// Blocks requested per sync round.
    #[serde(default = "default_sync_batch")]
    pub sync_batch: u64,

    /// Milliseconds before an unanswered sync request is re-issued.
    #[serde(default = "default_sync_request_timeout_ms")]
    pub sync_request_timeout_ms: u64,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_p2p_port() -> u16 {
    9610
}

fn default_max_peers() -> usize {
    40
}

fn default_block_interval_ms() -> u64 {
    1000
}

fn default_block_queue_capacity() -> usize {
    64
}

fn default_tx_queue_capacity() -> usize {
    8192
}

fn default_peer_send_queue_capacity() -> usize {
    256
}

fn default_known_block_capacity() -> usize {
    chronos_network::MAX_KNOWN_BLOCK
}

fn default_known_tx_capacity() -> usize {
    chronos_network::MAX_KNOWN_TRANSACTION
}

fn default_sync_batch() -> u64 {
    chronos_network::sync::SYNC_BATCH
}

fn default_sync_request_timeout_ms() -> u64 {
    5000
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty config populates every default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = NodeConfig::from_toml_str("").unwrap();
        assert_eq!(config.port, 9610);
        assert_eq!(config.block_interval_ms, 1000);
        assert_eq!(config.block_queue_capacity, 64);
        assert_eq!(config.tx_queue_capacity, 8192);
        assert_eq!(config.known_block_capacity, 1024);
        assert_eq!(config.known_tx_capacity, 32768);
        assert_eq!(config.fanout, FanoutPolicy::All);
    }

    #[test]
    fn fields_override_defaults() {
        let config = NodeConfig::from_toml_str(
            r#"
            port = 7001
            fanout = "sqrt"
            bootstrap_peers = ["127.0.0.1:7000"]
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 7001);
        assert_eq!(config.fanout, FanoutPolicy::Sqrt);
        assert_eq!(config.bootstrap_peers, vec!["127.0.0.1:7000".to_string()]);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        assert!(matches!(
            NodeConfig::from_toml_str("port = \"not a number\""),
            Err(NodeError::Config(_))
        ));
    }
}
