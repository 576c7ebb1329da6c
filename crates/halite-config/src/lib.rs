//! # halite-config: cluster and node configuration
//!
//! The cluster configuration is loaded once at startup and never
//! mutated: the ordered node list (ids plus peer/client addresses),
//! consensus timing, storage paths and thresholds, and session-layer
//! limits. See [`ConfigLoader`] for the file/env merge order.

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::ConfigLoader;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use halite_types::{NodeId, TimingParams};
use serde::{Deserialize, Serialize};

// ============================================================================
// Config Sections
// ============================================================================

/// One cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    /// Stable node id (also names the node's storage subdirectory).
    pub id: u32,
    /// Address the consensus peer listener binds to.
    pub peer_addr: SocketAddr,
    /// Address the client listener binds to.
    pub client_addr: SocketAddr,
}

/// Consensus timing, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    pub election_min_ms: u64,
    pub election_max_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            election_min_ms: 150,
            election_max_ms: 300,
            heartbeat_interval_ms: 50,
        }
    }
}

impl TimingConfig {
    /// Converts to the consensus layer's timing parameters.
    pub fn to_params(self) -> TimingParams {
        TimingParams {
            election_min: Duration::from_millis(self.election_min_ms),
            election_max: Duration::from_millis(self.election_max_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
        }
    }
}

/// Storage layout and thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root data directory; each node stores under `node-{id}/`.
    pub data_dir: PathBuf,
    /// Log segment rotation threshold in bytes.
    pub segment_max_bytes: u64,
    /// Applied bytes between snapshot checkpoints (0 disables).
    pub snapshot_threshold_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./halite-data"),
            segment_max_bytes: 64 * 1024 * 1024,
            snapshot_threshold_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Session-layer limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Capacity of each subscriber's notification mailbox; overflow
    /// drops the oldest entry.
    pub mailbox_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
        }
    }
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// The full node/cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HaliteConfig {
    pub nodes: Vec<NodeEntry>,
    pub timing: TimingConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
}

impl HaliteConfig {
    /// Validates cross-field invariants the type system can't express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::NoNodes);
        }
        let mut ids = std::collections::HashSet::new();
        let mut addrs = std::collections::HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id) {
                return Err(ConfigError::DuplicateNodeId(node.id));
            }
            if !addrs.insert(node.peer_addr) || !addrs.insert(node.client_addr) {
                return Err(ConfigError::DuplicateAddress(node.peer_addr));
            }
        }
        let t = &self.timing;
        if t.election_min_ms == 0 || t.election_min_ms > t.election_max_ms {
            return Err(ConfigError::BadTiming(
                "election_min_ms must be nonzero and ≤ election_max_ms".to_string(),
            ));
        }
        if t.heartbeat_interval_ms == 0 || t.heartbeat_interval_ms >= t.election_min_ms {
            return Err(ConfigError::BadTiming(
                "heartbeat_interval_ms must be nonzero and < election_min_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Looks up a member by id.
    pub fn node(&self, id: NodeId) -> Result<&NodeEntry, ConfigError> {
        self.nodes
            .iter()
            .find(|n| n.id == id.as_u32())
            .ok_or(ConfigError::UnknownNode(id.as_u32()))
    }

    /// All member ids, in configuration order.
    pub fn member_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| NodeId::new(n.id)).collect()
    }

    /// This node's storage directory.
    pub fn node_data_dir(&self, id: NodeId) -> PathBuf {
        self.storage.data_dir.join(format!("node-{}", id.as_u32()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_nodes() -> HaliteConfig {
        HaliteConfig {
            nodes: vec![
                NodeEntry {
                    id: 0,
                    peer_addr: "127.0.0.1:7100".parse().unwrap(),
                    client_addr: "127.0.0.1:7200".parse().unwrap(),
                },
                NodeEntry {
                    id: 1,
                    peer_addr: "127.0.0.1:7101".parse().unwrap(),
                    client_addr: "127.0.0.1:7201".parse().unwrap(),
                },
            ],
            ..HaliteConfig::default()
        }
    }

    #[test]
    fn valid_config_passes() {
        two_nodes().validate().unwrap();
    }

    #[test]
    fn empty_node_list_rejected() {
        let config = HaliteConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::NoNodes)));
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut config = two_nodes();
        config.nodes[1].id = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateNodeId(0))
        ));
    }

    #[test]
    fn duplicate_address_rejected() {
        let mut config = two_nodes();
        config.nodes[1].peer_addr = config.nodes[0].peer_addr;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateAddress(_))
        ));
    }

    #[test]
    fn heartbeat_must_undercut_election_window() {
        let mut config = two_nodes();
        config.timing.heartbeat_interval_ms = 200;
        assert!(matches!(config.validate(), Err(ConfigError::BadTiming(_))));
    }

    #[test]
    fn node_lookup() {
        let config = two_nodes();
        assert!(config.node(NodeId::new(1)).is_ok());
        assert!(matches!(
            config.node(NodeId::new(9)),
            Err(ConfigError::UnknownNode(9))
        ));
        assert_eq!(config.member_ids().len(), 2);
    }
}
