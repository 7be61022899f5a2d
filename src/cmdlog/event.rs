use std::fmt;

use chrono::NaiveDateTime;

/// Literal marker of a command start line.
pub const START_MARKER: &str = "CMD-START";

/// Literal marker of a command end line.
pub const END_MARKER: &str = "CMD-ENDE";

/// Marker the legacy system writes when it could not decode the command.
pub const UNRECOGNIZED_MARKER: &str = "unbekanntes CMD";

/// Prefix shared by every command label.
pub const COMMAND_PREFIX: &str = "ID_";

/// Label assigned to lines without a recognizable command.
pub const UNKNOWN_COMMAND: &str = "ID_Unknown";

/// EventKind identifies which half of a command lifecycle a line describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    End,
}

impl EventKind {
    /// Returns the canonical label used in logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single decoded command-log line.
///
/// Events are transient: consumers read them and drop them immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub thread_id: u32,
    pub timestamp: NaiveDateTime,
    pub kind: EventKind,
    /// Command label, or [`UNKNOWN_COMMAND`].
    pub command_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_as_str() {
        assert_eq!(EventKind::Start.as_str(), "start");
        assert_eq!(EventKind::End.to_string(), "end");
    }
}
