//! Server error types.
//!
//! These are the *fatal* errors: anything that ends the node process.
//! Client-visible errors travel as [`halite_wire::ErrorResponse`] frames
//! and never pass through here.

use std::net::SocketAddr;

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that end the node.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Durable store failure: halting beats silent divergence.
    #[error("storage error: {0}")]
    Storage(#[from] halite_storage::StorageError),

    /// Recovered on-disk state was inconsistent.
    #[error("recovery error: {0}")]
    Recovery(#[from] halite_raft::RecoveryError),

    /// I/O error on the poll loop itself.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A listener could not bind.
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Configuration error discovered at startup.
    #[error("configuration error: {0}")]
    Config(#[from] halite_config::ConfigError),
}
