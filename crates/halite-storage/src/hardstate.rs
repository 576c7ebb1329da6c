//! Hard state persistence.
//!
//! A single postcard record holding `{current_term, voted_for}` written
//! with the atomic temp + rename discipline. Absent file means a fresh
//! node: `{term: 0, voted_for: None}`.

use std::fs;
use std::path::Path;

use halite_types::HardState;

use crate::error::StorageError;

pub(crate) fn load(path: &Path) -> Result<HardState, StorageError> {
    match fs::read(path) {
        Ok(bytes) => postcard::from_bytes(&bytes)
            .map_err(|_| StorageError::CorruptFile(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HardState::default()),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn save(path: &Path, hs: &HardState) -> Result<(), StorageError> {
    let bytes = postcard::to_allocvec(hs)
        .expect("hard state serialization cannot fail: all fields are serializable");
    crate::atomic_write(path, &bytes)
}
