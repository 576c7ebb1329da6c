//! Storage error types.

use std::path::PathBuf;

use halite_types::LogIndex;
use thiserror::Error;

/// Errors from the durable store. All of them are fatal to the node.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted record failed checksum or decode validation.
    #[error("corrupt record in {path} at byte offset {offset}")]
    CorruptRecord { path: PathBuf, offset: u64 },

    /// A persisted single-file record (hard state, snapshot) is unreadable.
    #[error("corrupt file: {0}")]
    CorruptFile(PathBuf),

    /// The log manifest disagrees with the segment files on disk.
    #[error("log manifest inconsistent: {0}")]
    ManifestInconsistent(String),

    /// An append was not dense (hole or overlap in indexes).
    #[error("non-contiguous append: expected index {expected}, got {got}")]
    NonContiguousAppend { expected: LogIndex, got: LogIndex },

    /// A path had no parent directory to fsync.
    #[error("invalid storage path: {0}")]
    InvalidPath(PathBuf),
}
