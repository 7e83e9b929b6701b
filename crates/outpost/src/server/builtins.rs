//! Commands and packet types handled by the server itself

use super::Shared;
use crate::capability::{Capability, CapabilityId};
use crate::connection::{ClientId, Connection};
use crate::{OutpostError, Result};
use async_trait::async_trait;
use outpost_proto::{Packet, PacketType};
use std::sync::{Arc, Weak};
use tracing::info;

/// Identity the server registers its own capability under
pub const BUILTIN_CAPABILITY_ID: CapabilityId = CapabilityId(0);

/// Display name of the server's own capability
pub const BUILTIN_CAPABILITY_NAME: &str = "SERVER";

const LIST: &str = "list";
const USE: &str = "use";
const KICK: &str = "kick";
const HELP: &str = "help";
const EXIT: &str = "exit";

/// The server's face in the dispatcher. Holds a weak reference so the
/// dispatcher stored inside the server does not keep it alive.
pub(super) struct Builtins {
    server: Weak<Shared>,
}

impl Builtins {
    pub(super) fn new(server: Weak<Shared>) -> Self {
        Self { server }
    }

    fn server(&self) -> Result<Arc<Shared>> {
        self.server
            .upgrade()
            .ok_or_else(|| OutpostError::Capability("the server has been dropped".to_string()))
    }

    async fn list(&self, server: &Shared) -> Result<()> {
        let mut sessions = server.registry.sessions().await;
        if sessions.is_empty() {
            server.log.store("No client is connected.");
            return Ok(());
        }

        sessions.sort_by_key(|session| session.id());
        let active = server.active.read().await.as_ref().map(|c| c.id());
        for session in sessions {
            let connection = session.connection();
            let peer = connection
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "-".to_string());
            let marker = if Some(connection.id()) == active { " *" } else { "" };
            server
                .log
                .store(&format!("[{}] {}{}", connection.id(), peer, marker));
        }
        Ok(())
    }

    async fn switch(&self, server: &Shared, args: &[String]) -> Result<()> {
        let id = parse_client_id(USE, args)?;
        let session = server
            .registry
            .get(id)
            .await
            .ok_or_else(|| OutpostError::InvalidClientId(id.to_string()))?;

        server.set_active(Some(session.connection().clone())).await;
        info!(client = %id, "Active client switched");
        server
            .log
            .store(&format!("The current client has switched to [{}].", id));
        Ok(())
    }

    async fn kick(&self, server: &Shared, args: &[String]) -> Result<()> {
        let id = parse_client_id(KICK, args)?;
        if !server.registry.remove(id).await {
            return Err(OutpostError::InvalidClientId(id.to_string()));
        }

        info!(client = %id, "Client kicked");
        server
            .log
            .store(&format!("The client [{}] has been disconnected.", id));
        Ok(())
    }

    async fn help(&self, server: &Shared) -> Result<()> {
        let mut capabilities = server.dispatcher.read().await.all();
        capabilities.sort_by_key(|capability| capability.id());

        for capability in capabilities {
            let mut commands = capability.commands();
            commands.sort();
            server
                .log
                .store(&format!("{}: {}", capability.name(), commands.join(", ")));
        }
        Ok(())
    }
}

fn parse_client_id(command: &str, args: &[String]) -> Result<ClientId> {
    let [arg] = args else {
        return Err(OutpostError::InvalidArguments(format!(
            "usage: {} <client-id>",
            command
        )));
    };

    arg.parse()
        .map_err(|_| OutpostError::InvalidClientId(arg.clone()))
}

#[async_trait]
impl Capability for Builtins {
    fn id(&self) -> CapabilityId {
        BUILTIN_CAPABILITY_ID
    }

    fn name(&self) -> &str {
        BUILTIN_CAPABILITY_NAME
    }

    fn commands(&self) -> Vec<String> {
        [LIST, USE, KICK, HELP, EXIT]
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    fn packet_types(&self) -> Vec<PacketType> {
        vec![PacketType::CONNECT, PacketType::DISCONNECT]
    }

    async fn exec(&self, command: &str, args: &[String]) -> Result<()> {
        let server = self.server()?;
        match command {
            LIST => self.list(&server).await,
            USE => self.switch(&server, args).await,
            KICK => self.kick(&server, args).await,
            HELP => self.help(&server).await,
            EXIT => Err(OutpostError::ExitRequested),
            _ => Err(OutpostError::InvalidCommand(command.to_string())),
        }
    }

    async fn respond(&self, connection: &Arc<Connection>, packet: Packet) -> Result<()> {
        let server = self.server()?;
        match packet.packet_type() {
            PacketType::CONNECT => {
                let message = if packet.is_empty() {
                    format!("The client [{}] has announced itself.", connection.id())
                } else {
                    format!(
                        "The client [{}] has announced itself: {}",
                        connection.id(),
                        String::from_utf8_lossy(packet.data()).trim_end()
                    )
                };
                server.log.store(&message);
                Ok(())
            }
            PacketType::DISCONNECT => {
                server.log.store(&format!(
                    "The client [{}] is disconnecting.",
                    connection.id()
                ));
                Err(OutpostError::EndOfStream)
            }
            other => Err(OutpostError::Capability(format!(
                "unsupported packet type: {}",
                other
            ))),
        }
    }

    async fn set_active_connection(&self, _connection: Option<Arc<Connection>>) {
        // The server updates its own pointer before broadcasting.
    }
}
