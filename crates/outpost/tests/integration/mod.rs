//! Shared helpers for Outpost integration tests
//!
//! `TestAgent` speaks the wire format from the agent side of a real TCP
//! connection; `TestServer` wraps a server bound to an ephemeral port.

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use outpost::proto::{Packet, PacketCodec, PacketType};
use outpost::{
    Capability, CapabilityId, ClientId, Connection, LogQueue, OutpostError, Server, ServerConfig,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

/// Upper bound for any wait in these tests
pub const WAIT: Duration = Duration::from_secs(5);

/// Agent side of a connection
pub struct TestAgent {
    stream: TcpStream,
    codec: PacketCodec,
}

impl TestAgent {
    /// Connect to the server
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .context("Failed to connect to server")?;
        Ok(Self {
            stream,
            codec: PacketCodec::new(),
        })
    }

    /// Send one packet
    pub async fn send(&mut self, packet_type: i32, payload: &[u8]) -> Result<()> {
        let packet = Packet::with_payload(PacketType(packet_type), payload);
        self.codec.write_packet(&mut self.stream, &packet).await?;
        Ok(())
    }

    /// Receive one packet
    pub async fn recv(&mut self) -> Result<Packet> {
        let packet = timeout(WAIT, self.codec.read_packet(&mut self.stream))
            .await
            .context("Timed out waiting for a packet")??;
        Ok(packet)
    }

    /// Raw stream access
    pub fn stream(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

/// Server bound to 127.0.0.1 on an ephemeral port
pub struct TestServer {
    pub server: Server,
    pub addr: SocketAddr,
}

impl TestServer {
    /// Start a server with the given extra capabilities
    pub async fn start(capabilities: Vec<Arc<dyn Capability>>) -> Result<Self> {
        let config = ServerConfig::default()
            .with_host("127.0.0.1")
            .with_timestamp_format(None);
        let server = Server::new(config, Arc::new(LogQueue::new(std::io::sink()))).await?;
        for capability in capabilities {
            server.register(capability).await?;
        }
        let addr = server.startup(0).await?;
        Ok(Self { server, addr })
    }

    /// Wait until exactly `count` sessions are live
    pub async fn wait_for_sessions(&self, count: usize) -> Result<Vec<ClientId>> {
        timeout(WAIT, async {
            loop {
                let ids = self.server.sessions().await;
                if ids.len() == count {
                    return ids;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .with_context(|| format!("Never reached {} sessions", count))
    }
}

/// Capability relaying one packet type both ways, recording what arrives
pub struct Relay {
    id: u32,
    command: String,
    packet_type: PacketType,
    active: Mutex<Option<Arc<Connection>>>,
    received: mpsc::UnboundedSender<(ClientId, Vec<u8>)>,
}

impl Relay {
    pub fn new(
        id: u32,
        command: &str,
        packet_type: i32,
    ) -> (Arc<dyn Capability>, mpsc::UnboundedReceiver<(ClientId, Vec<u8>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let relay = Arc::new(Self {
            id,
            command: command.to_string(),
            packet_type: PacketType(packet_type),
            active: Mutex::new(None),
            received: tx,
        });
        (relay, rx)
    }
}

#[async_trait]
impl Capability for Relay {
    fn id(&self) -> CapabilityId {
        CapabilityId(self.id)
    }

    fn name(&self) -> &str {
        "RELAY"
    }

    fn commands(&self) -> Vec<String> {
        vec![self.command.clone()]
    }

    fn packet_types(&self) -> Vec<PacketType> {
        vec![self.packet_type]
    }

    async fn exec(&self, _command: &str, args: &[String]) -> outpost::Result<()> {
        let active = self.active.lock().unwrap().clone();
        let connection = active.ok_or(OutpostError::NoActiveConnection)?;
        let packet = Packet::with_payload(self.packet_type, format!("{}\r\n", args.join(" ")));
        connection.send_packet(&packet).await
    }

    async fn respond(&self, connection: &Arc<Connection>, packet: Packet) -> outpost::Result<()> {
        let _ = self.received.send((connection.id(), packet.data().to_vec()));
        Ok(())
    }

    async fn set_active_connection(&self, connection: Option<Arc<Connection>>) {
        *self.active.lock().unwrap() = connection;
    }
}
