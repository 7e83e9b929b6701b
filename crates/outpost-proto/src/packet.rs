//! Packet structure and payload cursor

use bytes::{Buf, Bytes, BytesMut};
use std::fmt;

/// Packet type tag carried in the first four bytes of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PacketType(pub i32);

impl PacketType {
    /// Default type of a packet, it means nothing
    pub const UNSPECIFIED: Self = Self(0);
    /// An agent announces itself
    pub const CONNECT: Self = Self(1);
    /// An agent is about to leave
    pub const DISCONNECT: Self = Self(2);

    /// Raw wire value
    pub fn value(self) -> i32 {
        self.0
    }
}

impl From<i32> for PacketType {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of draining bytes from the head of a packet payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// `n` bytes were copied and more payload remains
    More(usize),
    /// `n` bytes were copied and the payload is now exhausted
    End(usize),
}

impl ReadState {
    /// Number of bytes copied by the read
    pub fn len(self) -> usize {
        match self {
            Self::More(n) | Self::End(n) => n,
        }
    }

    /// Whether nothing was copied
    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Whether the payload has been fully consumed
    pub fn is_end(self) -> bool {
        matches!(self, Self::End(_))
    }
}

/// A typed packet with an append-only, head-consumable payload.
///
/// The declared data size is always the length of the remaining payload, so
/// the header written by the codec can never disagree with the bytes that
/// follow it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    packet_type: PacketType,
    data: BytesMut,
}

impl Packet {
    /// Create an empty packet of the given type
    pub fn new(packet_type: PacketType) -> Self {
        Self {
            packet_type,
            data: BytesMut::new(),
        }
    }

    /// Create a packet carrying a copy of `payload`
    pub fn with_payload(packet_type: PacketType, payload: impl AsRef<[u8]>) -> Self {
        let mut packet = Self::new(packet_type);
        packet.write(payload.as_ref());
        packet
    }

    pub(crate) fn from_parts(packet_type: PacketType, data: BytesMut) -> Self {
        Self { packet_type, data }
    }

    /// Packet type
    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Size of the remaining payload
    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    /// Remaining payload
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Take the remaining payload, leaving the packet empty
    pub fn take_data(&mut self) -> Bytes {
        self.data.split().freeze()
    }

    /// Append bytes to the tail of the payload
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        self.data.extend_from_slice(bytes);
        bytes.len()
    }

    /// Drain up to `buffer.len()` bytes from the head of the payload.
    ///
    /// Once the payload is exhausted every further call reports
    /// `ReadState::End(0)`.
    pub fn read(&mut self, buffer: &mut [u8]) -> ReadState {
        if self.data.is_empty() {
            return ReadState::End(0);
        }

        if buffer.len() >= self.data.len() {
            let n = self.data.len();
            buffer[..n].copy_from_slice(&self.data);
            self.data.clear();
            return ReadState::End(n);
        }

        let n = buffer.len();
        buffer.copy_from_slice(&self.data[..n]);
        self.data.advance(n);
        ReadState::More(n)
    }
}
