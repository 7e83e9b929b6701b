//! Outpost operator binary
//!
//! Listens for agents and runs the interactive console on stdin.

use anyhow::{Context, Result};
use clap::Parser;
use outpost::{LogQueue, LogSink, Server};
use outpost_server::{console, Cli, Screen, Shell};
use std::sync::Arc;
use tokio::io::{stdin, BufReader};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Diagnostics go to stderr so the console owns stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = cli.load_settings().context("Failed to load configuration")?;
    let log: Arc<dyn LogSink> = Arc::new(
        LogQueue::stdout().with_timestamp_format(settings.server.timestamp_format.clone()),
    );

    let server = Server::new(settings.server, log.clone()).await?;
    server.register(Arc::new(Shell::new(log.clone()))).await?;
    server
        .register(Arc::new(Screen::new(log.clone(), settings.screenshot_dir)))
        .await?;

    let addr = server.start().await.context("Failed to start the server")?;
    log.log(&format!("The server is listening on {}.", addr));

    let result = console::run(&server, BufReader::new(stdin()), std::io::stdout()).await;
    if let Err(e) = &result {
        error!("Console error: {}", e);
    }

    server.shutdown().await?;
    result.map_err(Into::into)
}
