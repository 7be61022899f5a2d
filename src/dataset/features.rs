//! Model-ready feature export of persisted rows.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{Datelike, Timelike};
use serde::Serialize;

use crate::registry::CommandRegistry;

use super::row::TrainingRow;

/// One line of `features.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    /// Seconds since midnight, microsecond precision.
    pub time_of_day_s: f64,
    /// Monday is 0.
    pub weekday: u32,
    pub concurrency_start: u32,
    pub concurrency_end: u32,
    pub concurrency_finished: u32,
    pub command_code: u32,
    pub cpu_usage: f64,
    pub response_time_s: f64,
}

impl FeatureRow {
    /// Derives the features of `row`, interning its label in `registry`.
    pub fn from_row(row: &TrainingRow, registry: &mut CommandRegistry) -> Self {
        let t = row.timestamp.time();
        let micros = t.nanosecond() / 1_000;
        Self {
            time_of_day_s: f64::from(t.num_seconds_from_midnight()) + f64::from(micros) / 1e6,
            weekday: row.timestamp.weekday().num_days_from_monday(),
            concurrency_start: row.concurrency_start,
            concurrency_end: row.concurrency_end,
            concurrency_finished: row.concurrency_finished,
            command_code: registry.intern(&row.command_id),
            cpu_usage: row.cpu_usage,
            response_time_s: row.duration_ms as f64 / 1000.0,
        }
    }
}

/// Writes one JSON object per row. Returns the number of lines written.
pub fn write_features<W: Write>(
    rows: &[TrainingRow],
    registry: &mut CommandRegistry,
    mut out: W,
) -> Result<u64> {
    let mut written = 0u64;
    for row in rows {
        let features = FeatureRow::from_row(row, registry);
        serde_json::to_writer(&mut out, &features).context("encoding feature row")?;
        out.write_all(b"\n").context("writing feature row")?;
        written += 1;
    }
    out.flush().context("flushing features")?;
    Ok(written)
}
