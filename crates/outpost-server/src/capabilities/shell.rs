//! Remote shell relay

use async_trait::async_trait;
use outpost::proto::{Packet, PacketType};
use outpost::{Capability, CapabilityId, Connection, LogSink, OutpostError, Result};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Packet type carrying shell commands and their output
pub const SHELL_PACKET: PacketType = PacketType(3);

/// Identity of the shell capability
pub const SHELL_CAPABILITY_ID: CapabilityId = CapabilityId(1);

const BORDER: &str = "----------------------------------------------------";

/// Forwards `exec` command lines to the active agent and prints what the
/// agent's shell writes back.
pub struct Shell {
    log: Arc<dyn LogSink>,
    active: RwLock<Option<Arc<Connection>>>,
}

impl Shell {
    /// Create a shell relay reporting through `log`
    pub fn new(log: Arc<dyn LogSink>) -> Self {
        Self {
            log,
            active: RwLock::new(None),
        }
    }
}

#[async_trait]
impl Capability for Shell {
    fn id(&self) -> CapabilityId {
        SHELL_CAPABILITY_ID
    }

    fn name(&self) -> &str {
        "SHELL"
    }

    fn commands(&self) -> Vec<String> {
        vec!["exec".to_string()]
    }

    fn packet_types(&self) -> Vec<PacketType> {
        vec![SHELL_PACKET]
    }

    async fn exec(&self, command: &str, args: &[String]) -> Result<()> {
        if command != "exec" {
            return Err(OutpostError::InvalidCommand(command.to_string()));
        }

        let connection = self
            .active
            .read()
            .await
            .clone()
            .ok_or(OutpostError::NoActiveConnection)?;

        let line = format!("{}\r\n", args.join(" "));
        debug!("Sending shell line to {}: {:?}", connection, line);
        connection
            .send_packet(&Packet::with_payload(SHELL_PACKET, line))
            .await
    }

    async fn respond(&self, connection: &Arc<Connection>, packet: Packet) -> Result<()> {
        let output = String::from_utf8_lossy(packet.data());
        self.log.store(&format!(
            "Shell messages from the client [{}]:\n{}\n{}\n{}",
            connection.id(),
            BORDER,
            output,
            BORDER
        ));
        Ok(())
    }

    async fn set_active_connection(&self, connection: Option<Arc<Connection>>) {
        *self.active.write().await = connection;
    }
}
