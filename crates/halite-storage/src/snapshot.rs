//! State machine snapshot checkpoints.
//!
//! A snapshot pairs an opaque state machine blob with the log index it
//! covers. At startup the node restores the blob and replays the log
//! from `last_applied + 1`. Snapshots only accelerate recovery; the log
//! itself is never compacted.

use std::fs;
use std::path::Path;

use bytes::Bytes;
use halite_types::LogIndex;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// A state machine checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The highest log index whose effects are included in `state`.
    pub last_applied: LogIndex,
    /// Opaque state machine blob.
    pub state: Bytes,
}

pub(crate) fn load(path: &Path) -> Result<Option<Snapshot>, StorageError> {
    match fs::read(path) {
        Ok(bytes) => postcard::from_bytes(&bytes)
            .map(Some)
            .map_err(|_| StorageError::CorruptFile(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn save(path: &Path, snapshot: &Snapshot) -> Result<(), StorageError> {
    let bytes = postcard::to_allocvec(snapshot)
        .expect("snapshot serialization cannot fail: all fields are serializable");
    crate::atomic_write(path, &bytes)
}
