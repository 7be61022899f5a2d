use chrono::{NaiveDate, NaiveDateTime};

use crate::lifecycle::CompletedRequest;

/// Storage format of [`TrainingRow::timestamp`].
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// One persisted sample of the training dataset, keyed by `timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub timestamp: NaiveDateTime,
    pub concurrency_start: u32,
    pub concurrency_end: u32,
    pub concurrency_finished: u32,
    pub command_id: String,
    pub duration_ms: i64,
    pub cpu_usage: f64,
    pub requests_per_second: u64,
    pub requests_per_minute: u64,
    pub switch_id: Option<String>,
    pub bytes_per_second: Option<f64>,
    pub packets_per_second: Option<f64>,
}

impl TrainingRow {
    /// Row with only the request fields set; enrichment fields take their
    /// "unknown" values.
    pub fn from_request(req: &CompletedRequest, cpu_usage: f64) -> Self {
        Self {
            timestamp: req.timestamp,
            concurrency_start: req.concurrency_start,
            concurrency_end: req.concurrency_end,
            concurrency_finished: req.concurrency_finished,
            command_id: req.command_id.clone(),
            duration_ms: req.duration_ms,
            cpu_usage,
            requests_per_second: 0,
            requests_per_minute: 0,
            switch_id: None,
            bytes_per_second: None,
            packets_per_second: None,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    pub fn timestamp_key(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}
