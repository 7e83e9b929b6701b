//! Command-line arguments for the operator binary

use clap::{ArgAction, Parser};
use crate::config::Settings;
use outpost::Result;
use std::path::PathBuf;

/// Interactive administration server for remote agents
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "outpost-server", version)]
pub struct Cli {
    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,
    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,
    /// JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Directory where screenshots are saved
    #[arg(long, value_name = "DIR")]
    pub screenshot_dir: Option<PathBuf>,
    /// Print log lines without timestamps
    #[arg(long)]
    pub no_timestamps: bool,
    /// Increase diagnostic verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Build the effective settings.
    ///
    /// Flags override the configuration file, which overrides defaults.
    pub fn load_settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::from_file(path)?,
            None => Settings::default(),
        };

        let mut server = settings.server;
        if let Some(host) = &self.host {
            server = server.with_host(host.clone());
        }
        if let Some(port) = self.port {
            server = server.with_port(port);
        }
        if self.no_timestamps {
            server = server.with_timestamp_format(None);
        }
        server.validate()?;
        settings.server = server;

        if let Some(dir) = &self.screenshot_dir {
            settings = settings.with_screenshot_dir(dir.clone());
        }
        Ok(settings)
    }

    /// Default `tracing` filter for the chosen verbosity
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
