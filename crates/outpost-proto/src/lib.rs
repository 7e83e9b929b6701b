//! # Outpost Protocol
//!
//! Wire packet definitions and the length-prefixed codec spoken between the
//! Outpost server and its remote agents.
//!
//! Every packet on the wire is an 8-byte little-endian header
//! (`type: i32`, `data_size: i32`) immediately followed by `data_size`
//! bytes of payload. There is no magic number, version field or delimiter.

#![warn(missing_docs)]

/// Packet structure and payload cursor
pub mod packet;

/// Packet codec for async streams
pub mod codec;

/// Error types for protocol operations
pub mod error;

pub use codec::{Header, PacketCodec, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use error::ProtocolError;
pub use packet::{Packet, PacketType, ReadState};
