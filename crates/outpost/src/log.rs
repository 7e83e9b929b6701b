//! Operator-facing log sink
//!
//! Receive loops run concurrently with the interactive console, so their
//! messages are queued and only printed when the console flushes them
//! between prompts.

use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// Sink for human-readable status messages
pub trait LogSink: Send + Sync {
    /// Print a message immediately
    fn log(&self, message: &str);

    /// Queue a message for the next flush, returning the queue length
    fn store(&self, message: &str) -> usize;

    /// Print every queued message in FIFO order
    fn flush(&self);
}

/// Whether `layout` is a `chrono` strftime layout that formats without error
pub fn is_valid_timestamp_format(layout: &str) -> bool {
    !StrftimeItems::new(layout).any(|item| matches!(item, Item::Error))
}

/// Queueing logger writing to any [`Write`] destination
pub struct LogQueue {
    pending: Mutex<VecDeque<String>>,
    out: Mutex<Box<dyn Write + Send>>,
    timestamp_format: Option<String>,
}

impl LogQueue {
    /// Create a queue writing to `out` without timestamps
    pub fn new<W>(out: W) -> Self
    where
        W: Write + Send + 'static,
    {
        Self {
            pending: Mutex::new(VecDeque::new()),
            out: Mutex::new(Box::new(out)),
            timestamp_format: None,
        }
    }

    /// Create a queue writing to standard output
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Prefix every message with the local time in this `chrono` layout
    pub fn with_timestamp_format(mut self, format: Option<String>) -> Self {
        self.timestamp_format = format;
        self
    }

    /// Number of queued messages
    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn format(&self, message: &str) -> String {
        let Some(layout) = &self.timestamp_format else {
            return message.to_string();
        };

        let mut line = String::new();
        if write!(line, "{}: {}", Local::now().format(layout), message).is_err() {
            warn!("Invalid timestamp format {:?}", layout);
            return message.to_string();
        }
        line
    }

    fn write_lines<'a>(&self, lines: impl IntoIterator<Item = &'a str>) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        for line in lines {
            if let Err(e) = writeln!(out, "{}", line) {
                warn!("Failed to write log message: {}", e);
                return;
            }
        }
        if let Err(e) = out.flush() {
            warn!("Failed to flush log output: {}", e);
        }
    }
}

impl LogSink for LogQueue {
    fn log(&self, message: &str) {
        let line = self.format(message);
        self.write_lines([line.as_str()]);
    }

    fn store(&self, message: &str) -> usize {
        let line = self.format(message);
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.push_back(line);
        pending.len()
    }

    fn flush(&self) {
        let drained: Vec<String> = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.drain(..).collect()
        };
        if !drained.is_empty() {
            self.write_lines(drained.iter().map(String::as_str));
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    /// Writer whose contents stay readable after being moved into a queue
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_store_defers_output() {
        let buffer = SharedBuffer::default();
        let queue = LogQueue::new(buffer.clone());

        assert_eq!(queue.store("first"), 1);
        assert_eq!(queue.store("second"), 2);
        assert_eq!(buffer.contents(), "");
        assert_eq!(queue.pending(), 2);

        queue.flush();
        assert_eq!(buffer.contents(), "first\nsecond\n");
        assert_eq!(queue.pending(), 0);

        queue.flush();
        assert_eq!(buffer.contents(), "first\nsecond\n");
    }

    #[test]
    fn test_log_is_immediate() {
        let buffer = SharedBuffer::default();
        let queue = LogQueue::new(buffer.clone());

        queue.store("queued");
        queue.log("now");
        assert_eq!(buffer.contents(), "now\n");
    }

    #[test]
    fn test_timestamp_prefix() {
        let buffer = SharedBuffer::default();
        let queue = LogQueue::new(buffer.clone()).with_timestamp_format(Some("%Y".to_string()));

        queue.log("hello");
        let year = Local::now().format("%Y").to_string();
        assert_eq!(buffer.contents(), format!("{}: hello\n", year));
    }

    #[test]
    fn test_invalid_timestamp_layout_falls_back() {
        let buffer = SharedBuffer::default();
        let queue = LogQueue::new(buffer.clone()).with_timestamp_format(Some("%Q".to_string()));

        assert_eq!(queue.store("hello"), 1);
        queue.log("now");
        queue.flush();
        assert_eq!(buffer.contents(), "now\nhello\n");
    }

    #[test]
    fn test_timestamp_layout_validation() {
        assert!(is_valid_timestamp_format("%b %e %H:%M:%S"));
        assert!(is_valid_timestamp_format("plain text"));
        assert!(!is_valid_timestamp_format("%Q"));
        assert!(!is_valid_timestamp_format("%"));
    }
}
