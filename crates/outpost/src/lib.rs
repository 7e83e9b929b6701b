//! # Outpost
//!
//! Session and dispatch engine for administering remote agents.
//!
//! Outpost listens for agent connections, keeps one session per connected
//! agent and routes traffic both ways through pluggable capabilities:
//! operator commands are resolved by name and inbound packets by type, and
//! each resolves to exactly one registered [`Capability`].

#![warn(missing_docs)]

pub use outpost_proto as proto;

/// Error types for the Outpost library
pub mod error;

/// Server configuration
pub mod config;

/// Operator-facing log sink
pub mod log;

/// Agent connections
pub mod connection;

/// Live session registry
pub mod registry;

/// Capability contract
pub mod capability;

/// Capability dispatch
pub mod dispatcher;

/// Listener and orchestration
pub mod server;

pub use capability::{Capability, CapabilityId};
pub use config::ServerConfig;
pub use connection::{ClientId, Connection};
pub use dispatcher::Dispatcher;
pub use error::OutpostError;
pub use log::{LogQueue, LogSink};
pub use registry::{Session, SessionRegistry};
pub use server::{Server, ServerState};

/// Result type alias for Outpost operations
pub type Result<T> = std::result::Result<T, OutpostError>;
