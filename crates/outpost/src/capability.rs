//! Contract every pluggable capability satisfies

use crate::connection::Connection;
use crate::Result;
use async_trait::async_trait;
use outpost_proto::{Packet, PacketType};
use std::fmt;
use std::sync::Arc;

/// Identity of a capability, unique within a dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapabilityId(pub u32);

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of functionality reachable by operator command and by packet type.
///
/// Capabilities keep their own copy of the active connection, sourced only
/// from [`Capability::set_active_connection`].
#[async_trait]
pub trait Capability: Send + Sync {
    /// Unique identity
    fn id(&self) -> CapabilityId;

    /// Display name
    fn name(&self) -> &str;

    /// Operator commands this capability executes
    fn commands(&self) -> Vec<String>;

    /// Packet types this capability responds to
    fn packet_types(&self) -> Vec<PacketType>;

    /// Execute one of [`Capability::commands`]
    async fn exec(&self, command: &str, args: &[String]) -> Result<()>;

    /// Handle a packet of one of [`Capability::packet_types`].
    ///
    /// Returning an error for which `ends_session(connection.id())` holds
    /// tells the server the session is gone.
    async fn respond(&self, connection: &Arc<Connection>, packet: Packet) -> Result<()>;

    /// The operator switched the active connection
    async fn set_active_connection(&self, connection: Option<Arc<Connection>>);

    /// Release held resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
