//! Frame codec: `[u32 BE length][postcard payload]`.

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Bytes of length prefix before every frame payload.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Hard cap on a single frame's payload (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Wire protocol errors.
#[derive(Debug, Error)]
pub enum WireError {
    /// A frame declared a payload longer than [`MAX_FRAME_SIZE`].
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_SIZE} byte cap")]
    FrameTooLarge(usize),

    /// The payload did not decode as the expected message type.
    #[error("malformed frame payload: {0}")]
    Malformed(String),
}

/// Appends one framed message to `buf`.
pub fn encode_frame<T: Serialize>(msg: &T, buf: &mut BytesMut) -> Result<(), WireError> {
    let payload = postcard::to_allocvec(msg).map_err(|e| WireError::Malformed(e.to_string()))?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge(payload.len()));
    }
    buf.reserve(FRAME_HEADER_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(())
}

/// Decodes one complete frame from the front of `buf`, if present.
///
/// Returns `Ok(None)` when the buffer holds only a partial frame; the
/// caller reads more bytes and tries again. On success the frame's bytes
/// are consumed from the buffer.
pub fn decode_frame<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, WireError> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }
    let len = u32::from_be_bytes(buf[..FRAME_HEADER_SIZE].try_into().expect("4 bytes")) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge(len));
    }
    if buf.len() < FRAME_HEADER_SIZE + len {
        return Ok(None);
    }
    buf.advance(FRAME_HEADER_SIZE);
    let payload = buf.split_to(len);
    let msg = postcard::from_bytes(&payload).map_err(|e| WireError::Malformed(e.to_string()))?;
    Ok(Some(msg))
}
