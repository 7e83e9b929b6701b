//! Interactive operator console
//!
//! Reads one command per line, splits it on whitespace and hands it to the
//! server. Queued log messages are flushed before every prompt.

use outpost::{OutpostError, Result, Server};
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

/// Prompt printed before each command
pub const PROMPT: &str = "> ";

/// Split a console line into a command and its arguments
pub fn parse_line(line: &str) -> (String, Vec<String>) {
    let mut words = line.split_whitespace();
    let command = words.next().unwrap_or_default().to_string();
    (command, words.map(str::to_string).collect())
}

/// Run the read-dispatch loop until input ends or `exit` is issued.
///
/// Command failures are reported through the server's log sink and do not
/// end the loop.
pub async fn run<R, W>(server: &Server, input: R, mut prompt: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    loop {
        server.log().flush();
        if let Err(e) = write!(prompt, "{}", PROMPT).and_then(|_| prompt.flush()) {
            warn!("Failed to write prompt: {}", e);
        }

        let Some(line) = lines.next_line().await? else {
            debug!("Console input closed");
            return Ok(());
        };

        let (command, args) = parse_line(&line);
        match server.exec(&command, &args).await {
            Ok(()) => {}
            Err(OutpostError::ExitRequested) => {
                debug!("Exit requested from the console");
                return Ok(());
            }
            Err(e) => server.log().log(&e.to_string()),
        }
    }
}
