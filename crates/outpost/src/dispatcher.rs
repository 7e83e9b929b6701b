//! Capability registry indexed by identity, command and packet type

use crate::capability::{Capability, CapabilityId};
use crate::{OutpostError, Result};
use outpost_proto::PacketType;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Maps identities, commands and packet types to exactly one capability.
///
/// All three indices are validated before any of them is touched, so a
/// rejected registration leaves the dispatcher unchanged.
#[derive(Default)]
pub struct Dispatcher {
    by_id: HashMap<CapabilityId, Arc<dyn Capability>>,
    by_command: HashMap<String, Arc<dyn Capability>>,
    by_packet_type: HashMap<PacketType, Arc<dyn Capability>>,
}

impl Dispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability under its identity, commands and packet types
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Result<()> {
        let id = capability.id();
        if self.by_id.contains_key(&id) {
            return Err(OutpostError::ConflictingId(id));
        }

        let commands = capability.commands();
        let mut seen = HashSet::new();
        for command in &commands {
            if self.by_command.contains_key(command) || !seen.insert(command.as_str()) {
                return Err(OutpostError::ConflictingCommand(command.clone()));
            }
        }

        let packet_types = capability.packet_types();
        let mut seen = HashSet::new();
        for packet_type in &packet_types {
            if self.by_packet_type.contains_key(packet_type) || !seen.insert(*packet_type) {
                return Err(OutpostError::ConflictingPacketType(*packet_type));
            }
        }

        for command in commands {
            self.by_command.insert(command, capability.clone());
        }
        for packet_type in packet_types {
            self.by_packet_type.insert(packet_type, capability.clone());
        }
        debug!("Registered capability {} ({})", capability.name(), id);
        self.by_id.insert(id, capability);

        Ok(())
    }

    /// Find a capability by identity
    pub fn by_id(&self, id: CapabilityId) -> Option<Arc<dyn Capability>> {
        self.by_id.get(&id).cloned()
    }

    /// Find the capability accepting a command
    pub fn by_command(&self, command: &str) -> Option<Arc<dyn Capability>> {
        self.by_command.get(command).cloned()
    }

    /// Find the capability responding to a packet type
    pub fn by_packet_type(&self, packet_type: PacketType) -> Option<Arc<dyn Capability>> {
        self.by_packet_type.get(&packet_type).cloned()
    }

    /// Snapshot of every registered capability, in no particular order
    pub fn all(&self) -> Vec<Arc<dyn Capability>> {
        self.by_id.values().cloned().collect()
    }

    /// Number of registered capabilities
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
