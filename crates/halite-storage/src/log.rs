//! Append-only segmented log with suffix truncation.
//!
//! Entries are framed records (see [`crate::codec`]) in numbered segment
//! files. A `segments.json` manifest tracks the index range of each
//! segment; counts for the active segment are recovered by scanning it at
//! open, so the manifest only needs rewriting when the segment set
//! changes (rotation or truncation).
//!
//! The log is dense and 1-based: the first entry ever written has index
//! 1, and `append` enforces contiguity. Suffix truncation rewrites the
//! boundary segment via temp + rename and deletes whole trailing
//! segments, so readers never observe a half-truncated state.

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use halite_types::{LogEntry, LogIndex};
use serde::{Deserialize, Serialize};

use crate::codec::{encode_record, scan_segment};
use crate::error::StorageError;

/// Manifest filename inside the log directory.
const MANIFEST_FILENAME: &str = "segments.json";

/// Formats a segment filename from its number.
fn segment_filename(segment_num: u32) -> String {
    format!("segment_{segment_num:06}.log")
}

/// Metadata for a single segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SegmentMeta {
    /// Segment number (0-based, monotonically increasing).
    segment_num: u32,
    /// Index of the first entry in this segment.
    first_index: u64,
    /// Number of entries. For the active segment this is refreshed by
    /// scanning at open; for completed segments it is authoritative.
    entry_count: u64,
    /// Size of the segment file in bytes.
    size_bytes: u64,
}

impl SegmentMeta {
    fn next_index(&self) -> u64 {
        self.first_index + self.entry_count
    }
}

/// The segment manifest: ordered segment list plus the active segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SegmentManifest {
    segments: Vec<SegmentMeta>,
    active_segment: u32,
}

impl SegmentManifest {
    fn new(first_index: u64) -> Self {
        Self {
            segments: vec![SegmentMeta {
                segment_num: 0,
                first_index,
                entry_count: 0,
                size_bytes: 0,
            }],
            active_segment: 0,
        }
    }

    fn save(&self, log_dir: &Path) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        crate::atomic_write(&log_dir.join(MANIFEST_FILENAME), json.as_bytes())
    }

    fn load(log_dir: &Path) -> Result<Option<Self>, StorageError> {
        match fs::read_to_string(log_dir.join(MANIFEST_FILENAME)) {
            Ok(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StorageError::ManifestInconsistent(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn active(&self) -> &SegmentMeta {
        self.segments
            .iter()
            .find(|s| s.segment_num == self.active_segment)
            .expect("active segment must exist in manifest")
    }

    fn active_mut(&mut self) -> &mut SegmentMeta {
        self.segments
            .iter_mut()
            .find(|s| s.segment_num == self.active_segment)
            .expect("active segment must exist in manifest")
    }

    /// Finds the segment containing `index` (segments ordered by
    /// `first_index`).
    fn find_segment(&self, index: u64) -> Option<&SegmentMeta> {
        match self
            .segments
            .binary_search_by_key(&index, |s| s.first_index)
        {
            Ok(pos) => Some(&self.segments[pos]),
            Err(0) => None,
            Err(pos) => {
                let seg = &self.segments[pos - 1];
                (index < seg.next_index()).then_some(seg)
            }
        }
    }

    fn rotate(&mut self, first_index: u64) -> u32 {
        let new_num = self.active_segment + 1;
        self.segments.push(SegmentMeta {
            segment_num: new_num,
            first_index,
            entry_count: 0,
            size_bytes: 0,
        });
        self.active_segment = new_num;
        new_num
    }
}

/// The on-disk replicated log.
#[derive(Debug)]
pub struct SegmentedLog {
    log_dir: PathBuf,
    manifest: SegmentManifest,
    max_segment_size: u64,
    /// Index the next appended entry must carry.
    next_index: u64,
}

impl SegmentedLog {
    /// Opens (or initializes) the log, recovering from a torn tail.
    pub fn open(log_dir: impl Into<PathBuf>, max_segment_size: u64) -> Result<Self, StorageError> {
        let log_dir = log_dir.into();
        fs::create_dir_all(&log_dir)?;

        let mut manifest = match SegmentManifest::load(&log_dir)? {
            Some(m) => m,
            None => {
                let m = SegmentManifest::new(1);
                m.save(&log_dir)?;
                m
            }
        };

        // Recover the active segment: scan it, drop a torn tail, refresh
        // the in-memory counts from what is actually on disk.
        let active_path = log_dir.join(segment_filename(manifest.active_segment));
        let (entry_count, valid_len) = match fs::read(&active_path) {
            Ok(buf) => {
                let (entries, valid_len, torn) = scan_segment(&buf, &active_path)?;
                if torn {
                    let file = OpenOptions::new().write(true).open(&active_path)?;
                    file.set_len(valid_len)?;
                    file.sync_all()?;
                }
                (entries.len() as u64, valid_len)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (0, 0),
            Err(e) => return Err(e.into()),
        };
        let active = manifest.active_mut();
        active.entry_count = entry_count;
        active.size_bytes = valid_len;
        let next_index = active.next_index();

        Ok(Self {
            log_dir,
            manifest,
            max_segment_size,
            next_index,
        })
    }

    /// Index of the last entry, or zero for an empty log.
    pub fn last_index(&self) -> LogIndex {
        LogIndex::new(self.next_index.saturating_sub(1))
    }

    /// Appends entries in index order, durable before returning.
    pub fn append(&mut self, entries: &[LogEntry]) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut expected = self.next_index;
        for entry in entries {
            if entry.index.as_u64() != expected {
                return Err(StorageError::NonContiguousAppend {
                    expected: LogIndex::new(expected),
                    got: entry.index,
                });
            }
            expected += 1;
        }

        let mut buf = Vec::new();
        for entry in entries {
            encode_record(entry, &mut buf);
        }

        let path = self.active_path();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&buf)?;
        file.sync_data()?;

        self.next_index = expected;
        let max = self.max_segment_size;
        let active = self.manifest.active_mut();
        active.entry_count += entries.len() as u64;
        active.size_bytes += buf.len() as u64;

        if active.size_bytes >= max {
            let new_num = self.manifest.rotate(self.next_index);
            // Truncate any orphan file left at this number by an
            // interrupted truncation, so stale records cannot resurface.
            crate::atomic_write(&self.log_dir.join(segment_filename(new_num)), &[])?;
            self.manifest.save(&self.log_dir)?;
        }
        Ok(())
    }

    /// Reads a single entry by index.
    pub fn read_entry(&self, index: LogIndex) -> Result<Option<LogEntry>, StorageError> {
        let Some(seg) = self.manifest.find_segment(index.as_u64()) else {
            return Ok(None);
        };
        if index.as_u64() >= self.next_index {
            return Ok(None);
        }
        let path = self.log_dir.join(segment_filename(seg.segment_num));
        let buf = fs::read(&path)?;
        let (entries, _, _) = scan_segment(&buf, &path)?;
        Ok(entries.into_iter().find(|e| e.index == index))
    }

    /// Returns an iterator over entries with index ≥ `from`, in order.
    pub fn read_from(&self, from: LogIndex) -> EntryIter {
        let from = from.as_u64().max(1);
        let paths = self
            .manifest
            .segments
            .iter()
            .filter(|s| s.next_index() > from)
            .map(|s| self.log_dir.join(segment_filename(s.segment_num)))
            .collect();
        EntryIter {
            segments: paths,
            pending: Vec::new().into_iter(),
            from: LogIndex::new(from),
        }
    }

    /// Drops all entries with index ≥ `from_index`, atomically w.r.t.
    /// readers.
    ///
    /// Whole trailing segments are deleted; a segment straddling the
    /// boundary is rewritten via temp + rename.
    pub fn truncate_suffix(&mut self, from_index: LogIndex) -> Result<(), StorageError> {
        let from = from_index.as_u64().max(1);
        if from >= self.next_index {
            return Ok(());
        }

        // Segments that start at or past the boundary are dropped whole.
        // The manifest is rewritten before their files are deleted, so a
        // crash in between leaves only unreferenced orphans (which
        // rotation truncates before reuse).
        let (keep, drop): (Vec<SegmentMeta>, Vec<SegmentMeta>) = self
            .manifest
            .segments
            .iter()
            .cloned()
            .partition(|s| s.first_index < from);

        if keep.is_empty() {
            // Entire log truncated away: start over from `from`.
            self.manifest = SegmentManifest::new(from);
            crate::atomic_write(&self.active_path(), &[])?;
            self.manifest.save(&self.log_dir)?;
        } else {
            self.manifest.segments = keep;
            let boundary = self
                .manifest
                .segments
                .last()
                .expect("non-empty keep set")
                .clone();
            self.manifest.active_segment = boundary.segment_num;

            if boundary.next_index() > from {
                // Rewrite the boundary segment without the truncated suffix.
                let path = self.log_dir.join(segment_filename(boundary.segment_num));
                let buf = fs::read(&path)?;
                let (entries, _, _) = scan_segment(&buf, &path)?;
                let mut out = Vec::new();
                let mut kept = 0u64;
                for entry in entries.iter().filter(|e| e.index.as_u64() < from) {
                    encode_record(entry, &mut out);
                    kept += 1;
                }
                crate::atomic_write(&path, &out)?;
                let active = self.manifest.active_mut();
                active.entry_count = kept;
                active.size_bytes = out.len() as u64;
            }

            self.manifest.save(&self.log_dir)?;
        }

        // A full truncation reuses segment number 0; don't delete the
        // file just rewritten under the new manifest.
        let referenced: Vec<u32> = self.manifest.segments.iter().map(|s| s.segment_num).collect();
        for seg in drop.iter().filter(|s| !referenced.contains(&s.segment_num)) {
            let path = self.log_dir.join(segment_filename(seg.segment_num));
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.next_index = from;
        Ok(())
    }

    fn active_path(&self) -> PathBuf {
        self.log_dir
            .join(segment_filename(self.manifest.active_segment))
    }
}

/// In-order iterator over log entries, loading one segment at a time.
#[derive(Debug)]
pub struct EntryIter {
    segments: VecDeque<PathBuf>,
    pending: std::vec::IntoIter<LogEntry>,
    from: LogIndex,
}

impl Iterator for EntryIter {
    type Item = Result<LogEntry, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            for entry in self.pending.by_ref() {
                if entry.index >= self.from {
                    return Some(Ok(entry));
                }
            }
            let path = self.segments.pop_front()?;
            let buf = match fs::read(&path) {
                Ok(buf) => buf,
                Err(e) => return Some(Err(e.into())),
            };
            match scan_segment(&buf, &path) {
                Ok((entries, _, _)) => self.pending = entries.into_iter(),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
