//! Packet codec for async streams

use crate::{Packet, PacketType, ProtocolError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the fixed packet header on the wire
pub const HEADER_SIZE: usize = 8;

/// Maximum payload size (64MB)
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Fixed-size packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Packet type
    pub packet_type: PacketType,
    /// Declared payload size
    pub data_size: i32,
}

impl Header {
    /// Decode a header from its 8 little-endian bytes
    pub fn decode(bytes: [u8; HEADER_SIZE]) -> Self {
        let mut buf = &bytes[..];
        let packet_type = PacketType(buf.get_i32_le());
        let data_size = buf.get_i32_le();
        Self {
            packet_type,
            data_size,
        }
    }

    /// Append the 8 little-endian header bytes to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.packet_type.value());
        buf.put_i32_le(self.data_size);
    }
}

/// Packet codec for encoding/decoding packets over async streams.
///
/// Reads are split in two: the fixed header first, then exactly as many
/// payload bytes as the header declared. Short reads and writes on the
/// underlying stream are looped over until the full count is transferred.
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    /// Maximum payload size allowed
    max_payload_size: usize,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketCodec {
    /// Create a new codec with the default payload limit
    pub fn new() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }

    /// Create a new codec with a custom payload limit
    pub fn with_max_payload_size(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }

    /// Configured payload limit
    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Encode a packet into `HEADER_SIZE + data_size` bytes
    pub fn encode_packet(&self, packet: &Packet) -> Result<Bytes, ProtocolError> {
        let size = self.check_size(packet.data_size())?;

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + packet.data_size());
        Header {
            packet_type: packet.packet_type(),
            data_size: size,
        }
        .encode(&mut buf);
        buf.put_slice(packet.data());

        Ok(buf.freeze())
    }

    /// Decode and validate a header
    pub fn decode_header(&self, bytes: [u8; HEADER_SIZE]) -> Result<Header, ProtocolError> {
        let header = Header::decode(bytes);
        if header.data_size < 0 {
            return Err(ProtocolError::InvalidSize(header.data_size));
        }
        self.check_size(header.data_size as usize)?;
        Ok(header)
    }

    /// Write a packet to an async writer
    pub async fn write_packet<W>(&self, writer: &mut W, packet: &Packet) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let encoded = self.encode_packet(packet)?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one whole packet from an async reader
    pub async fn read_packet<R>(&self, reader: &mut R) -> Result<Packet, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header).await?;
        let header = self.decode_header(header)?;

        let mut data = BytesMut::zeroed(header.data_size as usize);
        reader.read_exact(&mut data).await?;

        Ok(Packet::from_parts(header.packet_type, data))
    }

    fn check_size(&self, size: usize) -> Result<i32, ProtocolError> {
        if size > self.max_payload_size || size > i32::MAX as usize {
            return Err(ProtocolError::PacketTooLarge {
                size,
                max: self.max_payload_size,
            });
        }
        Ok(size as i32)
    }
}
