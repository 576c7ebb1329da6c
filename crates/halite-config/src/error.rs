//! Configuration error types.

use std::net::SocketAddr;

use thiserror::Error;

/// Validation failures in a loaded configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration lists no nodes")]
    NoNodes,

    #[error("duplicate node id {0}")]
    DuplicateNodeId(u32),

    #[error("address {0} is used more than once")]
    DuplicateAddress(SocketAddr),

    #[error("node id {0} is not in the cluster configuration")]
    UnknownNode(u32),

    #[error("invalid timing: {0}")]
    BadTiming(String),
}
