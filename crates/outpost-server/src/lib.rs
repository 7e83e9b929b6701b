//! # Outpost Server
//!
//! Operator-side pieces of Outpost: the concrete capabilities, the
//! interactive console and command-line parsing.

#![warn(missing_docs)]

/// Concrete capabilities
pub mod capabilities;

/// Command-line arguments
pub mod cli;

/// Binary settings
pub mod config;

/// Interactive operator console
pub mod console;

pub use capabilities::{Screen, Shell};
pub use cli::Cli;
pub use config::Settings;
