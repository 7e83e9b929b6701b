//! Settings for the operator binary
//!
//! The core [`ServerConfig`] fields sit at the top level of the JSON file
//! next to the settings of the capabilities shipped here.

use outpost::{OutpostError, Result, ServerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Core server configuration plus capability settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Listener and logging configuration
    #[serde(flatten)]
    pub server: ServerConfig,
    /// Directory where received screenshots are saved
    pub screenshot_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            screenshot_dir: PathBuf::from("."),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file. Missing fields take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            OutpostError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let settings: Self = serde_json::from_str(&contents)?;
        settings.server.validate()?;
        Ok(settings)
    }

    /// Set the screenshot directory
    pub fn with_screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = dir.into();
        self
    }
}
