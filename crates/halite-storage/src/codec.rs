//! Record framing for log segment files.
//!
//! Each record is `[u32 LE payload length][payload][8-byte checksum]`
//! where the payload is a postcard-encoded [`LogEntry`] and the checksum
//! is the first 8 bytes of the payload's blake3 hash. A record that fails
//! either the length or the checksum check marks the end of usable data
//! in a segment (a torn write from a crash mid-append).

use std::path::Path;

use halite_types::LogEntry;

use crate::error::StorageError;

/// Bytes of framing before the payload.
pub(crate) const LEN_PREFIX: usize = 4;

/// Truncated blake3 checksum length.
pub(crate) const CHECKSUM_LEN: usize = 8;

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let hash = blake3::hash(payload);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&hash.as_bytes()[..CHECKSUM_LEN]);
    out
}

/// Appends the framed encoding of `entry` to `buf`.
pub(crate) fn encode_record(entry: &LogEntry, buf: &mut Vec<u8>) {
    let payload = postcard::to_allocvec(entry)
        .expect("log entry serialization cannot fail: all fields are serializable");
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&checksum(&payload));
}

/// Outcome of decoding one record from a segment buffer.
pub(crate) enum Decoded {
    /// A valid record and the total bytes it occupied.
    Entry(LogEntry, usize),
    /// Clean end of segment (no bytes left).
    End,
    /// A torn or corrupt record starts at this offset.
    Torn,
}

/// Decodes the record starting at `offset` in `buf`.
pub(crate) fn decode_record(buf: &[u8], offset: usize) -> Decoded {
    let rest = &buf[offset.min(buf.len())..];
    if rest.is_empty() {
        return Decoded::End;
    }
    if rest.len() < LEN_PREFIX {
        return Decoded::Torn;
    }
    let len = u32::from_le_bytes(rest[..LEN_PREFIX].try_into().expect("4 bytes")) as usize;
    let total = LEN_PREFIX + len + CHECKSUM_LEN;
    if rest.len() < total {
        return Decoded::Torn;
    }
    let payload = &rest[LEN_PREFIX..LEN_PREFIX + len];
    let stored = &rest[LEN_PREFIX + len..total];
    if stored != checksum(payload) {
        return Decoded::Torn;
    }
    match postcard::from_bytes::<LogEntry>(payload) {
        Ok(entry) => Decoded::Entry(entry, total),
        Err(_) => Decoded::Torn,
    }
}

/// Scans a whole segment buffer, returning the decoded entries and the
/// byte length of the valid prefix. Used at open to recover from a torn
/// tail, and by reads.
pub(crate) fn scan_segment(
    buf: &[u8],
    path: &Path,
) -> Result<(Vec<LogEntry>, u64, bool), StorageError> {
    let mut entries = Vec::new();
    let mut offset = 0usize;
    loop {
        match decode_record(buf, offset) {
            Decoded::Entry(entry, used) => {
                entries.push(entry);
                offset += used;
            }
            Decoded::End => return Ok((entries, offset as u64, false)),
            Decoded::Torn => {
                tracing::warn!(
                    path = %path.display(),
                    offset,
                    "torn record at segment tail, truncating"
                );
                return Ok((entries, offset as u64, true));
            }
        }
    }
}
