//! Server configuration

use crate::log::is_valid_timestamp_format;
use crate::{OutpostError, Result};
use outpost_proto::MAX_PAYLOAD_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default TCP listening port
pub const DEFAULT_PORT: u16 = 10080;

/// Default timestamp layout for operator-facing log lines
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%b %e %H:%M:%S";

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the listener on
    pub host: String,
    /// Port to bind the listener on
    pub port: u16,
    /// Largest payload a packet may declare
    pub max_packet_size: usize,
    /// `chrono` layout prefixed to log lines, `None` disables timestamps
    pub timestamp_format: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_packet_size: MAX_PAYLOAD_SIZE,
            timestamp_format: Some(DEFAULT_TIMESTAMP_FORMAT.to_string()),
        }
    }
}

impl ServerConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            OutpostError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if let Some(layout) = &self.timestamp_format {
            if !is_valid_timestamp_format(layout) {
                return Err(OutpostError::Config(format!(
                    "invalid timestamp format: {:?}",
                    layout
                )));
            }
        }
        Ok(())
    }

    /// Set the bind host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the listening port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the packet payload limit
    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    /// Set or clear the log timestamp layout
    pub fn with_timestamp_format(mut self, format: Option<String>) -> Self {
        self.timestamp_format = format;
        self
    }

    /// `host:port` string handed to the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
