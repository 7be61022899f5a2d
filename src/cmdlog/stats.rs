use super::event::{EventKind, LogEvent};
use super::parse::ParseError;

/// Per-file line counters collected while scanning a command log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineStats {
    pub lines: u64,
    pub starts: u64,
    pub ends: u64,
    /// Lines with a marker that failed to parse.
    pub malformed: u64,
    /// Lines without any lifecycle marker.
    pub unmarked: u64,
}

impl LineStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one parse outcome.
    pub fn record(&mut self, outcome: &Result<LogEvent, ParseError>) {
        self.lines += 1;
        match outcome {
            Ok(event) => match event.kind {
                EventKind::Start => self.starts += 1,
                EventKind::End => self.ends += 1,
            },
            Err(ParseError::NoMarker) => self.unmarked += 1,
            Err(_) => self.malformed += 1,
        }
    }
}
