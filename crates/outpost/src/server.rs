//! Listener, per-connection receive loops and command routing

use crate::capability::Capability;
use crate::connection::{ClientId, Connection};
use crate::dispatcher::Dispatcher;
use crate::log::LogSink;
use crate::registry::{Session, SessionRegistry};
use crate::{OutpostError, Result, ServerConfig};
use outpost_proto::PacketCodec;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

mod builtins;

pub use builtins::{BUILTIN_CAPABILITY_ID, BUILTIN_CAPABILITY_NAME};

/// Server lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Constructed, not yet listening
    Created,
    /// Accepting connections
    Listening,
    /// Shut down
    Closed,
}

/// State shared by the server handle, its tasks and its built-in capability
struct Shared {
    config: ServerConfig,
    codec: PacketCodec,
    registry: SessionRegistry,
    dispatcher: RwLock<Dispatcher>,
    active: RwLock<Option<Arc<Connection>>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    state: Mutex<ServerState>,
    local_addr: OnceLock<SocketAddr>,
    log: Arc<dyn LogSink>,
}

impl Shared {
    async fn set_active(&self, connection: Option<Arc<Connection>>) {
        *self.active.write().await = connection.clone();

        let capabilities = self.dispatcher.read().await.all();
        for capability in capabilities {
            capability.set_active_connection(connection.clone()).await;
        }
    }

    /// Drop the active pointer if its session has been removed
    async fn check_active(&self) {
        let active = self.active.read().await.clone();
        if let Some(connection) = active {
            if self.registry.get(connection.id()).await.is_none() {
                self.log.log(&format!(
                    "The current client [{}] has become invalid.",
                    connection.id()
                ));
                self.set_active(None).await;
            }
        }
    }
}

/// The server: owns the listener, the session registry and the dispatcher.
///
/// It registers its own commands and packet types as an ordinary
/// capability, so operator commands and inbound packets have a single
/// dispatch path.
pub struct Server {
    shared: Arc<Shared>,
}

impl Server {
    /// Create a server and register its built-in capability
    pub async fn new(config: ServerConfig, log: Arc<dyn LogSink>) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let shared = Arc::new(Shared {
            codec: PacketCodec::with_max_payload_size(config.max_packet_size),
            config,
            registry: SessionRegistry::new(shutdown.clone()),
            dispatcher: RwLock::new(Dispatcher::new()),
            active: RwLock::new(None),
            shutdown,
            tasks: TaskTracker::new(),
            state: Mutex::new(ServerState::Created),
            local_addr: OnceLock::new(),
            log,
        });

        let server = Self { shared };
        let builtins = builtins::Builtins::new(Arc::downgrade(&server.shared));
        server.register(Arc::new(builtins)).await?;
        Ok(server)
    }

    /// Register a capability
    pub async fn register(&self, capability: Arc<dyn Capability>) -> Result<()> {
        self.shared.dispatcher.write().await.register(capability)
    }

    /// Bind the listener on the configured host and port, then start accepting
    pub async fn start(&self) -> Result<SocketAddr> {
        self.startup(self.shared.config.port).await
    }

    /// Bind the listener on the configured host and `port`, then start accepting.
    ///
    /// Returns the bound address, which differs from the request when `port`
    /// is 0.
    pub async fn startup(&self, port: u16) -> Result<SocketAddr> {
        let mut state = self.shared.state.lock().await;
        if *state != ServerState::Created {
            return Err(OutpostError::AlreadyStarted);
        }

        let addr = format!("{}:{}", self.shared.config.host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| OutpostError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let _ = self.shared.local_addr.set(local_addr);

        self.shared
            .tasks
            .spawn(accept_loop(self.shared.clone(), listener));
        *state = ServerState::Listening;

        info!("Listening on {}", local_addr);
        Ok(local_addr)
    }

    /// Execute an operator command.
    ///
    /// Buffered log output is flushed before and after. An empty command only
    /// flushes and drops a stale active connection.
    pub async fn exec(&self, command: &str, args: &[String]) -> Result<()> {
        let shared = &self.shared;
        shared.log.flush();
        shared.check_active().await;

        if command.is_empty() {
            return Ok(());
        }

        let capability = shared.dispatcher.read().await.by_command(command);
        let result = match capability {
            Some(capability) => {
                debug!("Dispatching '{}' to {}", command, capability.name());
                capability.exec(command, args).await
            }
            None => Err(OutpostError::InvalidCommand(command.to_string())),
        };

        shared.log.flush();
        result
    }

    /// Switch the active connection and notify every capability
    pub async fn set_active_connection(&self, connection: Option<Arc<Connection>>) {
        self.shared.set_active(connection).await
    }

    /// The connection untargeted commands apply to
    pub async fn active_connection(&self) -> Option<Arc<Connection>> {
        self.shared.active.read().await.clone()
    }

    /// Identities of every live session, ascending
    pub async fn sessions(&self) -> Vec<ClientId> {
        self.shared.registry.ids().await
    }

    /// Connection of a live session
    pub async fn connection(&self, id: ClientId) -> Option<Arc<Connection>> {
        self.shared
            .registry
            .get(id)
            .await
            .map(|session| session.connection().clone())
    }

    /// Deliberately end a session
    pub async fn remove_session(&self, id: ClientId) -> bool {
        self.shared.registry.remove(id).await
    }

    /// Bound listener address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr.get().copied()
    }

    /// Current lifecycle state
    pub async fn state(&self) -> ServerState {
        *self.shared.state.lock().await
    }

    /// Operator-facing log sink
    pub fn log(&self) -> &Arc<dyn LogSink> {
        &self.shared.log
    }

    /// Stop accepting, close every session and wait for all tasks.
    ///
    /// Later calls return immediately.
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock().await;
            if *state == ServerState::Closed {
                return Ok(());
            }
            *state = ServerState::Closed;
        }

        info!("Shutting down server");
        let shared = &self.shared;
        shared.shutdown.cancel();
        shared.registry.close_all().await;

        shared.tasks.close();
        shared.tasks.wait().await;

        shared.set_active(None).await;
        let capabilities = shared.dispatcher.read().await.all();
        for capability in capabilities {
            if let Err(e) = capability.close().await {
                warn!("Failed to close capability {}: {}", capability.name(), e);
                shared
                    .log
                    .store(&format!("Failed to close {}: {}", capability.name(), e));
            }
        }

        shared.log.flush();
        shared.log.log("The server has exited.");
        info!("Server shutdown complete");
        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        let accepted = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let connection = Arc::new(Connection::from_tcp(stream, shared.codec));
                let id = connection.id();
                info!(client = %id, %peer, "Accepted connection");
                shared.log.store(&format!(
                    "A new client [{}] has connected from {}.",
                    id, peer
                ));

                match shared.registry.add(connection).await {
                    Ok(session) => {
                        shared.tasks.spawn(receive_loop(shared.clone(), session));
                    }
                    Err(e) => {
                        debug!(client = %id, "Dropping connection: {}", e);
                        break;
                    }
                }
            }
            Err(e) => {
                if !shared.shutdown.is_cancelled() {
                    error!("Failed to accept connection: {}", e);
                    shared.log.store(&format!(
                        "The server has stopped accepting connections: {}",
                        e
                    ));
                }
                break;
            }
        }
    }

    drop(listener);
    debug!("Accept loop exited");
}

async fn receive_loop(shared: Arc<Shared>, session: Arc<Session>) {
    let connection = session.connection().clone();
    let id = connection.id();

    loop {
        let received = tokio::select! {
            biased;
            _ = session.cancelled() => break,
            received = connection.receive_packet() => received,
        };

        let packet = match received {
            Ok(packet) => packet,
            Err(e) => {
                // A deliberate removal already closed the session.
                if !session.is_cancelled() {
                    shared.registry.remove(id).await;
                    if e.ends_session(id) {
                        info!(client = %id, "Client disconnected");
                        shared
                            .log
                            .store(&format!("The client [{}] has disconnected.", id));
                    } else {
                        warn!(client = %id, "Receive failed: {}", e);
                        shared
                            .log
                            .store(&format!("The client [{}] has failed: {}", id, e));
                    }
                }
                break;
            }
        };

        let packet_type = packet.packet_type();
        let capability = shared.dispatcher.read().await.by_packet_type(packet_type);
        let Some(capability) = capability else {
            warn!(client = %id, %packet_type, "Unrecognized packet type");
            shared.log.store(&format!(
                "The client [{}] has sent a packet with invalid type: {}",
                id, packet_type
            ));
            continue;
        };

        if let Err(e) = capability.respond(&connection, packet).await {
            if e.ends_session(id) {
                debug!(client = %id, "{} ended the session", capability.name());
                shared.registry.remove(id).await;
                break;
            }
            shared.log.store(&format!(
                "{} failed to handle a packet from the client [{}]: {}",
                capability.name(),
                id,
                e
            ));
        }
    }

    debug!(client = %id, "Receive loop exited");
}

#[cfg(test)]
mod tests;
