//! Connection state management.
//!
//! One [`Connection`] per accepted socket, client or peer: a nonblocking
//! stream plus read/write buffers. Reads accumulate bytes until a whole
//! frame decodes; writes drain the buffer whenever the socket accepts
//! more.

use std::io::{self, Read, Write};

use bytes::BytesMut;
use mio::net::TcpStream;
use mio::{Interest, Token};
use serde::de::DeserializeOwned;
use serde::Serialize;

use halite_wire::{decode_frame, encode_frame, WireError};

/// Read chunk size.
const READ_CHUNK: usize = 8 * 1024;

/// Above this much buffered outbound data, subscription notifications
/// stay queued in the bounded mailbox instead of growing the buffer.
pub const WRITE_HIGH_WATER: usize = 256 * 1024;

/// State of one framed connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique token for this connection (kept for debugging).
    #[allow(dead_code)]
    pub token: Token,
    pub stream: TcpStream,
    pub read_buf: BytesMut,
    pub write_buf: BytesMut,
    /// Set when the peer closed or errored; the owner deregisters it.
    pub closed: bool,
    /// Client connections: set once the connection subscribed.
    pub subscribed: bool,
}

impl Connection {
    pub fn new(token: Token, stream: TcpStream) -> Self {
        Self {
            token,
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::new(),
            closed: false,
            subscribed: false,
        }
    }

    /// Reads everything available and decodes complete frames.
    ///
    /// A wire error (oversized or malformed frame) poisons the
    /// connection: the caller closes it.
    pub fn read_frames<T: DeserializeOwned>(&mut self) -> Result<Vec<T>, WireError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.closed = true;
                    break;
                }
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => {
                    self.closed = true;
                    break;
                }
            }
        }

        let mut frames = Vec::new();
        while let Some(frame) = decode_frame(&mut self.read_buf)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Queues a framed message for writing and tries to flush.
    pub fn queue<T: Serialize>(&mut self, msg: &T) -> Result<(), WireError> {
        encode_frame(msg, &mut self.write_buf)?;
        self.flush();
        Ok(())
    }

    /// Writes as much buffered data as the socket accepts.
    pub fn flush(&mut self) {
        use bytes::Buf;
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => {
                    self.closed = true;
                    return;
                }
                Ok(n) => self.write_buf.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => {
                    self.closed = true;
                    return;
                }
            }
        }
    }

    /// Room for more outbound notification traffic?
    pub fn below_high_water(&self) -> bool {
        self.write_buf.len() < WRITE_HIGH_WATER
    }

    /// The interest set matching the current buffer state.
    pub fn interests(&self) -> Interest {
        if self.write_buf.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        }
    }
}
