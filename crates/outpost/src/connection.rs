//! Agent connections and whole-packet transfer

use crate::{OutpostError, Result};
use outpost_proto::{Packet, PacketCodec};
use std::fmt;
use std::net::SocketAddr;
use std::num::ParseIntError;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

static NEXT_CLIENT_ID: AtomicU32 = AtomicU32::new(1);

/// Identity of a connected agent, unique for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u32);

impl ClientId {
    /// Allocate the next unused identity
    pub fn next() -> Self {
        Self(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn value(self) -> u32 {
        self.0
    }
}

impl From<u32> for ClientId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl FromStr for ClientId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One live agent connection.
///
/// The read and write halves are locked independently: the receive loop
/// owns reads while any capability may send concurrently. Once closed, every
/// further transfer fails with [`OutpostError::ConnectionClosed`].
pub struct Connection {
    id: ClientId,
    peer: Option<SocketAddr>,
    codec: PacketCodec,
    reader: Mutex<Option<BoxedReader>>,
    writer: Mutex<Option<BoxedWriter>>,
    closed: CancellationToken,
}

impl Connection {
    /// Wrap any bidirectional byte stream, allocating a fresh identity
    pub fn new<S>(stream: S, codec: PacketCodec) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            id: ClientId::next(),
            peer: None,
            codec,
            reader: Mutex::new(Some(Box::new(reader))),
            writer: Mutex::new(Some(Box::new(writer))),
            closed: CancellationToken::new(),
        }
    }

    /// Wrap an accepted TCP stream
    pub fn from_tcp(stream: TcpStream, codec: PacketCodec) -> Self {
        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        Self {
            id: ClientId::next(),
            peer,
            codec,
            reader: Mutex::new(Some(Box::new(reader))),
            writer: Mutex::new(Some(Box::new(writer))),
            closed: CancellationToken::new(),
        }
    }

    /// Session identity
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Remote address, when the stream has one
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Whether [`Connection::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Block until one whole packet has arrived
    pub async fn receive_packet(&self) -> Result<Packet> {
        if self.is_closed() {
            return Err(OutpostError::ConnectionClosed(self.id));
        }

        let mut guard = self.reader.lock().await;
        let reader = guard
            .as_mut()
            .ok_or(OutpostError::ConnectionClosed(self.id))?;

        tokio::select! {
            _ = self.closed.cancelled() => Err(OutpostError::ConnectionClosed(self.id)),
            result = self.codec.read_packet(reader) => {
                let packet = result?;
                trace!(
                    client = %self.id,
                    packet_type = %packet.packet_type(),
                    size = packet.data_size(),
                    "Received packet"
                );
                Ok(packet)
            }
        }
    }

    /// Encode and write one whole packet
    pub async fn send_packet(&self, packet: &Packet) -> Result<()> {
        if self.is_closed() {
            return Err(OutpostError::ConnectionClosed(self.id));
        }

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or(OutpostError::ConnectionClosed(self.id))?;

        tokio::select! {
            _ = self.closed.cancelled() => Err(OutpostError::ConnectionClosed(self.id)),
            result = self.codec.write_packet(writer, packet) => {
                result?;
                trace!(
                    client = %self.id,
                    packet_type = %packet.packet_type(),
                    size = packet.data_size(),
                    "Sent packet"
                );
                Ok(())
            }
        }
    }

    /// Close both halves of the stream. Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        self.closed.cancel();

        let writer = self.writer.lock().await.take();
        let reader = self.reader.lock().await.take();
        drop(reader);

        if let Some(mut writer) = writer {
            debug!(client = %self.id, "Closing connection");
            if let Err(e) = writer.shutdown().await {
                debug!(client = %self.id, "Error shutting down connection: {}", e);
            }
        }

        Ok(())
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}
