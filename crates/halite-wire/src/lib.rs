//! # halite-wire: binary wire protocol
//!
//! Length-prefixed postcard frames over TCP, shared by the two RPC
//! surfaces:
//!
//! - **Client surface**: [`Request`] / [`Response`] pairs correlated by
//!   [`RequestId`], plus server-pushed [`ResponsePayload::Notification`]
//!   frames (reserved id 0) on subscribed connections.
//! - **Peer surface**: the consensus crate's message envelope, framed
//!   with the same codec as an opaque payload.
//!
//! The codec is deliberately tiny: `[u32 BE length][postcard bytes]`,
//! with a hard frame size cap so a corrupt peer cannot make a node
//! allocate without bound.

mod client;
mod frame;

pub use client::{ErrorResponse, Request, RequestPayload, Response, ResponsePayload};
pub use frame::{decode_frame, encode_frame, WireError, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};

pub use halite_types::RequestId;
