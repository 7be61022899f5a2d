use std::io::{BufRead, Write};

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::warn;

/// Structural inconsistency in the event stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    #[error("thread {thread_id} started {command_id} at {at} while {open_command} is still open")]
    DuplicateStart {
        thread_id: u32,
        at: NaiveDateTime,
        command_id: String,
        open_command: String,
    },

    #[error("thread {thread_id} ended {command_id} at {at} without an open command")]
    UnmatchedEnd {
        thread_id: u32,
        at: NaiveDateTime,
        command_id: String,
    },

    #[error("thread {thread_id} still has {command_id} open since {started} at end of stream")]
    OpenAtEndOfStream {
        thread_id: u32,
        command_id: String,
        started: NaiveDateTime,
    },
}

impl Anomaly {
    /// Short stable name, used as a metric label.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateStart { .. } => "duplicate_start",
            Self::UnmatchedEnd { .. } => "unmatched_end",
            Self::OpenAtEndOfStream { .. } => "open_at_end",
        }
    }

    pub const fn thread_id(&self) -> u32 {
        match self {
            Self::DuplicateStart { thread_id, .. }
            | Self::UnmatchedEnd { thread_id, .. }
            | Self::OpenAtEndOfStream { thread_id, .. } => *thread_id,
        }
    }
}

/// Operator decision on an anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Drop the offending event and keep going.
    Continue,
    /// Stop the run before the current file commits anything.
    Abort,
}

/// Decides what to do with an anomaly raised mid-stream.
pub trait AnomalyHandler {
    fn decide(&mut self, anomaly: &Anomaly) -> Decision;
}

/// Logs every anomaly and continues.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForceMode;

impl AnomalyHandler for ForceMode {
    fn decide(&mut self, anomaly: &Anomaly) -> Decision {
        warn!(kind = anomaly.kind(), %anomaly, "dropping event");
        Decision::Continue
    }
}

/// Asks the operator on `output` and reads the answer from `input`.
///
/// An empty answer or `c` continues, `a`/`abort` aborts. End of input
/// aborts, since nobody is there to confirm.
pub struct InteractivePrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> InteractivePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, anomaly: &Anomaly) -> std::io::Result<Decision> {
        let mut answer = String::new();
        loop {
            write!(
                self.output,
                "anomaly: {anomaly}\n[Enter/c] continue, [a] abort: "
            )?;
            self.output.flush()?;

            answer.clear();
            if self.input.read_line(&mut answer)? == 0 {
                return Ok(Decision::Abort);
            }

            match answer.trim().to_ascii_lowercase().as_str() {
                "" | "c" | "continue" => return Ok(Decision::Continue),
                "a" | "abort" => return Ok(Decision::Abort),
                other => writeln!(self.output, "unrecognized answer {other:?}")?,
            }
        }
    }
}

impl<R: BufRead, W: Write> AnomalyHandler for InteractivePrompt<R, W> {
    fn decide(&mut self, anomaly: &Anomaly) -> Decision {
        warn!(kind = anomaly.kind(), %anomaly, "anomaly requires a decision");
        match self.ask(anomaly) {
            Ok(decision) => decision,
            Err(err) => {
                warn!(error = %err, "prompt failed, aborting");
                Decision::Abort
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Cursor;

    fn unmatched() -> Anomaly {
        Anomaly::UnmatchedEnd {
            thread_id: 4,
            at: NaiveDate::from_ymd_opt(2021, 12, 20)
                .and_then(|d| d.and_hms_opt(10, 0, 0))
                .expect("valid timestamp"),
            command_id: "ID_A".to_string(),
        }
    }

    fn prompt_with(input: &str) -> (Decision, String) {
        let mut out = Vec::new();
        let decision = {
            let mut prompt = InteractivePrompt::new(Cursor::new(input.as_bytes()), &mut out);
            prompt.decide(&unmatched())
        };
        (decision, String::from_utf8(out).expect("utf8 prompt"))
    }

    #[test]
    fn test_force_mode_continues() {
        assert_eq!(ForceMode.decide(&unmatched()), Decision::Continue);
    }

    #[test]
    fn test_prompt_empty_answer_continues() {
        let (decision, text) = prompt_with("\n");
        assert_eq!(decision, Decision::Continue);
        assert!(text.contains("thread 4 ended ID_A"));
    }

    #[test]
    fn test_prompt_abort() {
        assert_eq!(prompt_with("abort\n").0, Decision::Abort);
        assert_eq!(prompt_with("A\n").0, Decision::Abort);
    }

    #[test]
    fn test_prompt_eof_aborts() {
        assert_eq!(prompt_with("").0, Decision::Abort);
    }

    #[test]
    fn test_prompt_reasks_on_garbage() {
        let (decision, text) = prompt_with("maybe\nc\n");
        assert_eq!(decision, Decision::Continue);
        assert!(text.contains("unrecognized answer \"maybe\""));
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(unmatched().kind(), "unmatched_end");
        assert_eq!(unmatched().thread_id(), 4);
    }
}
