//! Pairs command start and end events by thread id.
//!
//! Each thread has at most one open command. The tracker keeps those in a
//! map keyed by thread id; the map size is the system-wide open count.

pub mod anomaly;

use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::cmdlog::{EventKind, LogEvent};

pub use self::anomaly::{Anomaly, AnomalyHandler, Decision, ForceMode, InteractivePrompt};

/// Command that has started but not yet ended on its thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub thread_id: u32,
    pub command_id: String,
    pub start_time: NaiveDateTime,
    /// Commands open strictly before this one started.
    pub concurrency_at_start: u32,
    /// Commands open when this one ended, itself included.
    pub concurrency_at_end: u32,
    /// Sibling commands that completed while this one was open.
    pub concurrency_finished: u32,
}

/// A matched start/end pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRequest {
    /// End time of the command.
    pub timestamp: NaiveDateTime,
    pub command_id: String,
    pub concurrency_start: u32,
    pub concurrency_end: u32,
    pub concurrency_finished: u32,
    /// Whole milliseconds between start and end, truncated toward zero.
    pub duration_ms: i64,
}

/// LifecycleTracker holds the open command of every thread.
#[derive(Debug, Default)]
pub struct LifecycleTracker {
    pending_by_tid: HashMap<u32, PendingCommand>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commands currently open.
    pub fn open_count(&self) -> u32 {
        u32::try_from(self.pending_by_tid.len()).unwrap_or(u32::MAX)
    }

    pub fn is_open(&self, thread_id: u32) -> bool {
        self.pending_by_tid.contains_key(&thread_id)
    }

    pub fn pending(&self, thread_id: u32) -> Option<&PendingCommand> {
        self.pending_by_tid.get(&thread_id)
    }

    /// Dispatch an event to [`Self::on_start`] or [`Self::on_end`].
    pub fn handle(&mut self, event: &LogEvent) -> Result<Option<CompletedRequest>, Anomaly> {
        match event.kind {
            EventKind::Start => self
                .on_start(event.thread_id, event.timestamp, &event.command_id)
                .map(|()| None),
            EventKind::End => self
                .on_end(event.thread_id, event.timestamp, &event.command_id)
                .map(Some),
        }
    }

    /// Opens a command on `thread_id`.
    ///
    /// A start on a thread that is already open is rejected and leaves the
    /// existing command untouched.
    pub fn on_start(
        &mut self,
        thread_id: u32,
        at: NaiveDateTime,
        command_id: &str,
    ) -> Result<(), Anomaly> {
        if let Some(open) = self.pending_by_tid.get(&thread_id) {
            return Err(Anomaly::DuplicateStart {
                thread_id,
                at,
                command_id: command_id.to_string(),
                open_command: open.command_id.clone(),
            });
        }

        let concurrency_at_start = self.open_count();
        self.pending_by_tid.insert(
            thread_id,
            PendingCommand {
                thread_id,
                command_id: command_id.to_string(),
                start_time: at,
                concurrency_at_start,
                concurrency_at_end: 0,
                concurrency_finished: 0,
            },
        );
        Ok(())
    }

    /// Closes the open command of `thread_id` and returns its record.
    ///
    /// The label of the end line is only used for anomaly reporting; the
    /// record carries the label seen at start.
    pub fn on_end(
        &mut self,
        thread_id: u32,
        at: NaiveDateTime,
        command_id: &str,
    ) -> Result<CompletedRequest, Anomaly> {
        let concurrency_at_end = self.open_count();
        let Some(mut done) = self.pending_by_tid.remove(&thread_id) else {
            return Err(Anomaly::UnmatchedEnd {
                thread_id,
                at,
                command_id: command_id.to_string(),
            });
        };

        for sibling in self.pending_by_tid.values_mut() {
            sibling.concurrency_finished += 1;
        }

        done.concurrency_at_end = concurrency_at_end;
        Ok(CompletedRequest {
            timestamp: at,
            duration_ms: (at - done.start_time).num_milliseconds(),
            command_id: done.command_id,
            concurrency_start: done.concurrency_at_start,
            concurrency_end: done.concurrency_at_end,
            concurrency_finished: done.concurrency_finished,
        })
    }

    /// Discards all still-open commands and reports them, ordered by thread id.
    pub fn finish(&mut self) -> Vec<Anomaly> {
        let mut leftovers: Vec<PendingCommand> =
            self.pending_by_tid.drain().map(|(_, p)| p).collect();
        leftovers.sort_by_key(|p| p.thread_id);

        leftovers
            .into_iter()
            .map(|p| Anomaly::OpenAtEndOfStream {
                thread_id: p.thread_id,
                command_id: p.command_id,
                started: p.start_time,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmdlog::parse_line;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32, milli: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 12, 20)
            .and_then(|d| d.and_hms_milli_opt(h, m, s, milli))
            .expect("valid timestamp")
    }

    #[test]
    fn test_single_request() {
        let mut tracker = LifecycleTracker::new();
        let start = parse_line("[7] 2021-12-20 10:00:00.000 CMD-START ID_A").expect("start");
        let end = parse_line("[7] 2021-12-20 10:00:00.150 CMD-ENDE ID_A").expect("end");

        assert_eq!(tracker.handle(&start).expect("no anomaly"), None);
        let done = tracker
            .handle(&end)
            .expect("no anomaly")
            .expect("completed request");

        assert_eq!(done.command_id, "ID_A");
        assert_eq!(done.duration_ms, 150);
        assert_eq!(done.concurrency_start, 0);
        assert_eq!(done.concurrency_end, 1);
        assert_eq!(done.concurrency_finished, 0);
        assert_eq!(done.timestamp, at(10, 0, 0, 150));
        assert_eq!(tracker.open_count(), 0);
    }

    #[test]
    fn test_sibling_completion_increments_finished() {
        let mut tracker = LifecycleTracker::new();
        tracker.on_start(1, at(10, 0, 0, 0), "ID_A").expect("t1 start");
        tracker.on_start(2, at(10, 0, 0, 10), "ID_B").expect("t2 start");

        let first = tracker.on_end(1, at(10, 0, 0, 20), "ID_A").expect("t1 end");
        assert_eq!(first.concurrency_end, 2);
        assert_eq!(first.concurrency_start, 0);
        assert_eq!(tracker.pending(2).expect("t2 open").concurrency_finished, 1);

        let second = tracker.on_end(2, at(10, 0, 0, 30), "ID_B").expect("t2 end");
        assert_eq!(second.concurrency_start, 1);
        assert_eq!(second.concurrency_end, 1);
        assert_eq!(second.concurrency_finished, 1);
    }

    #[test]
    fn test_finished_counts_every_sibling() {
        let mut tracker = LifecycleTracker::new();
        tracker.on_start(1, at(10, 0, 0, 0), "ID_LONG").expect("start");
        for tid in 2..6 {
            tracker.on_start(tid, at(10, 0, 1, 0), "ID_S").expect("start");
        }

        let mut last = 0;
        for tid in 2..6 {
            tracker.on_end(tid, at(10, 0, 2, 0), "ID_S").expect("end");
            let now = tracker.pending(1).expect("long open").concurrency_finished;
            assert_eq!(now, last + 1);
            last = now;
        }

        let long = tracker.on_end(1, at(10, 0, 3, 0), "ID_LONG").expect("end");
        assert_eq!(long.concurrency_finished, 4);
        assert_eq!(long.concurrency_end, 1);
    }

    #[test]
    fn test_unmatched_end() {
        let mut tracker = LifecycleTracker::new();
        let err = tracker
            .on_end(9, at(10, 0, 0, 0), "ID_X")
            .expect_err("unmatched end");
        assert_eq!(err.kind(), "unmatched_end");
        assert_eq!(tracker.open_count(), 0);
    }

    #[test]
    fn test_duplicate_start_keeps_original() {
        let mut tracker = LifecycleTracker::new();
        tracker.on_start(3, at(10, 0, 0, 0), "ID_FIRST").expect("start");
        let err = tracker
            .on_start(3, at(10, 0, 1, 0), "ID_SECOND")
            .expect_err("duplicate start");

        assert!(matches!(
            err,
            Anomaly::DuplicateStart { ref open_command, .. } if open_command == "ID_FIRST"
        ));
        let pending = tracker.pending(3).expect("still open");
        assert_eq!(pending.command_id, "ID_FIRST");
        assert_eq!(pending.start_time, at(10, 0, 0, 0));
        assert_eq!(tracker.open_count(), 1);
    }

    #[test]
    fn test_duration_truncates_toward_zero() {
        let mut tracker = LifecycleTracker::new();
        let start = at(10, 0, 0, 0);
        tracker.on_start(1, start, "ID_A").expect("start");
        let end = start + chrono::Duration::microseconds(1_999);
        let done = tracker.on_end(1, end, "ID_A").expect("end");
        assert_eq!(done.duration_ms, 1);
    }

    #[test]
    fn test_finish_reports_leftovers() {
        let mut tracker = LifecycleTracker::new();
        tracker.on_start(8, at(10, 0, 0, 0), "ID_B").expect("start");
        tracker.on_start(2, at(10, 0, 0, 0), "ID_A").expect("start");

        let leftovers = tracker.finish();
        assert_eq!(leftovers.len(), 2);
        assert_eq!(leftovers[0].thread_id(), 2);
        assert_eq!(leftovers[1].thread_id(), 8);
        assert!(leftovers.iter().all(|a| a.kind() == "open_at_end"));
        assert_eq!(tracker.open_count(), 0);
    }

    #[test]
    fn test_completed_count_matches_end_count() {
        let mut tracker = LifecycleTracker::new();
        let mut completed = 0;
        for round in 0..50u32 {
            let tid = round % 7;
            tracker
                .on_start(tid, at(10, 0, round % 60, 0), "ID_A")
                .expect("start");
            tracker
                .on_end(tid, at(10, 1, round % 60, 0), "ID_A")
                .expect("end");
            completed += 1;
        }
        assert_eq!(completed, 50);
        assert!(tracker.finish().is_empty());
    }
}
