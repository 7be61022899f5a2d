pub mod event;
pub mod parse;
pub mod stats;

use std::io::BufRead;

use anyhow::{Context, Result};
use tracing::debug;

pub use self::event::{EventKind, LogEvent, UNKNOWN_COMMAND};
pub use self::parse::{extract_command, is_start_marker, parse_line, parse_timestamp, ParseError};
pub use self::stats::LineStats;

/// Number of lines between two progress log entries.
pub const PROGRESS_INTERVAL: u64 = 20_000;

/// Line reader over a command log that reuses one buffer.
///
/// Invalid UTF-8 is replaced rather than rejected; the legacy system
/// occasionally writes Latin-1 payloads into otherwise ASCII lines.
pub struct CommandLogReader<R> {
    inner: R,
    raw: Vec<u8>,
    line: String,
    line_no: u64,
    label: String,
}

impl<R: BufRead> CommandLogReader<R> {
    pub fn new(inner: R, label: impl Into<String>) -> Self {
        Self {
            inner,
            raw: Vec::with_capacity(256),
            line: String::with_capacity(256),
            line_no: 0,
            label: label.into(),
        }
    }

    /// Returns the next line without its terminator, or `None` at EOF.
    pub fn next_line(&mut self) -> Result<Option<&str>> {
        self.raw.clear();
        let n = self
            .inner
            .read_until(b'\n', &mut self.raw)
            .with_context(|| format!("reading line {} of {}", self.line_no + 1, self.label))?;
        if n == 0 {
            return Ok(None);
        }

        self.line_no += 1;
        if self.line_no % PROGRESS_INTERVAL == 0 {
            debug!(file = %self.label, lines = self.line_no, "scan progress");
        }

        while matches!(self.raw.last(), Some(b'\n' | b'\r')) {
            self.raw.pop();
        }

        self.line.clear();
        self.line.push_str(&String::from_utf8_lossy(&self.raw));
        Ok(Some(&self.line))
    }

    /// Number of lines returned so far.
    pub fn lines_read(&self) -> u64 {
        self.line_no
    }
}
