//! Error types for the Outpost library

use crate::capability::CapabilityId;
use crate::connection::ClientId;
use outpost_proto::{PacketType, ProtocolError};
use std::io;
use thiserror::Error;

/// Main error type for Outpost operations
#[derive(Debug, Error)]
pub enum OutpostError {
    /// Another capability already owns this identity
    #[error("conflicting capability id: {0}")]
    ConflictingId(CapabilityId),

    /// Another capability already accepts this command
    #[error("conflicting command: {0}")]
    ConflictingCommand(String),

    /// Another capability already responds to this packet type
    #[error("conflicting packet type: {0}")]
    ConflictingPacketType(PacketType),

    /// Framing or transport failure on a connection
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection has already been closed
    #[error("the connection [{0}] has been closed")]
    ConnectionClosed(ClientId),

    /// The session is gone and should be cleaned up
    #[error("end of stream")]
    EndOfStream,

    /// No capability accepts the command
    #[error("the command is invalid: {0}")]
    InvalidCommand(String),

    /// The given client id does not name a live session
    #[error("invalid client id: {0}")]
    InvalidClientId(String),

    /// The command needs an active connection and there is none
    #[error("the current connection is null")]
    NoActiveConnection,

    /// The command was called with unusable arguments
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The listening socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Startup was requested twice
    #[error("the server has already been started")]
    AlreadyStarted,

    /// The session registry no longer accepts sessions
    #[error("the session registry has been closed")]
    RegistryClosed,

    /// The operator asked to leave
    #[error("exit requested")]
    ExitRequested,

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// Failure reported by a capability
    #[error("{0}")]
    Capability(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl OutpostError {
    /// Whether this error means the peer is gone.
    ///
    /// `ConnectionClosed` names a specific connection and is not included;
    /// use [`OutpostError::ends_session`] to classify it for one session.
    pub fn is_end_of_stream(&self) -> bool {
        match self {
            Self::EndOfStream => true,
            Self::Protocol(e) => e.is_end_of_stream(),
            Self::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }

    /// Whether this error ends the session of connection `id`
    pub fn ends_session(&self, id: ClientId) -> bool {
        match self {
            Self::ConnectionClosed(closed) => *closed == id,
            other => other.is_end_of_stream(),
        }
    }
}

impl From<serde_json::Error> for OutpostError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("JSON error: {}", err))
    }
}
