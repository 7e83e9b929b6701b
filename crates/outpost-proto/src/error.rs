//! Error types for protocol operations

use std::io;
use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Underlying transport failure, including a premature end of stream
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// Declared payload size is negative
    #[error("invalid payload size: {0}")]
    InvalidSize(i32),

    /// Payload exceeds the configured limit
    #[error("packet too large: {size} bytes (max: {max})")]
    PacketTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },
}

impl ProtocolError {
    /// Whether the peer went away (clean close, reset or a truncated frame).
    pub fn is_end_of_stream(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
