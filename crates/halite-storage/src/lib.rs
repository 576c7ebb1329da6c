//! # halite-storage: crash-atomic durable store
//!
//! Persists the three pieces of node state that must survive crashes:
//!
//! - **Hard state** (current term, last vote) — a single record written
//!   via temp file + fsync + atomic rename.
//! - **Replicated log** — append-only segment files with a manifest;
//!   supports in-order reads and atomic suffix truncation.
//! - **Snapshot** — an optional state machine checkpoint, also written
//!   via temp + rename.
//!
//! # File Layout
//!
//! ```text
//! {data_dir}/
//! ├── hardstate
//! ├── snapshot
//! └── log/
//!     ├── segment_000000.log
//!     ├── segment_000001.log     <- active (appended to)
//!     └── segments.json          <- manifest (index ranges)
//! ```
//!
//! Every I/O failure is surfaced as a [`StorageError`] and is fatal to
//! the caller: a node that cannot persist must halt rather than reply,
//! because an unpersisted-but-acknowledged entry would break the log
//! matching guarantee after a crash.

mod codec;
mod error;
mod hardstate;
mod log;
mod snapshot;

pub use error::StorageError;
pub use log::{EntryIter, SegmentedLog};
pub use snapshot::Snapshot;

use std::fs;
use std::path::{Path, PathBuf};

use halite_types::HardState;

/// The durable store for one node: hard state + log + snapshot under a
/// single data directory.
#[derive(Debug)]
pub struct DiskStore {
    data_dir: PathBuf,
    log: SegmentedLog,
}

impl DiskStore {
    /// Opens (or initializes) the store under `data_dir`.
    ///
    /// Recovery happens here: the log manifest is loaded, the active
    /// segment is scanned, and a torn tail record left by a crash
    /// mid-append is truncated off.
    pub fn open(
        data_dir: impl Into<PathBuf>,
        max_segment_size: u64,
    ) -> Result<Self, StorageError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        let log = SegmentedLog::open(data_dir.join("log"), max_segment_size)?;
        Ok(Self { data_dir, log })
    }

    /// Loads the persisted hard state; defaults when absent (fresh node).
    pub fn load_hard_state(&self) -> Result<HardState, StorageError> {
        hardstate::load(&self.hard_state_path())
    }

    /// Persists the hard state via temp + fsync + rename.
    ///
    /// Must complete before any message derived from the new state leaves
    /// the node.
    pub fn save_hard_state(&self, hs: &HardState) -> Result<(), StorageError> {
        hardstate::save(&self.hard_state_path(), hs)
    }

    /// Loads the snapshot checkpoint, if one was ever written.
    pub fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError> {
        snapshot::load(&self.snapshot_path())
    }

    /// Persists a snapshot checkpoint via temp + fsync + rename.
    pub fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        snapshot::save(&self.snapshot_path(), snapshot)
    }

    /// The replicated log.
    pub fn log(&self) -> &SegmentedLog {
        &self.log
    }

    /// The replicated log, mutable.
    pub fn log_mut(&mut self) -> &mut SegmentedLog {
        &mut self.log
    }

    fn hard_state_path(&self) -> PathBuf {
        self.data_dir.join("hardstate")
    }

    fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("snapshot")
    }
}

/// Writes `bytes` to `path` atomically: temp file in the same directory,
/// fsync, rename over the target, then fsync the directory so the rename
/// itself is durable.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    use std::io::Write;

    let dir = path
        .parent()
        .ok_or_else(|| StorageError::InvalidPath(path.to_path_buf()))?;
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}
