//! Request-rate aggregation over command start events.
//!
//! Two views are maintained from the same stream: time-of-day tables used
//! for lookups during enrichment, and per-unit windows whose flushed
//! buckets feed the workload report.

pub mod bucket;
pub mod statistics;

use std::collections::{BTreeMap, HashSet};

use anyhow::Result;
use chrono::{NaiveDateTime, NaiveTime};

use crate::cmdlog::{extract_command, is_start_marker, parse_timestamp};

use self::bucket::WindowTier;
pub use self::bucket::{RateBucket, TimeUnit};
pub use self::statistics::RequestStatistics;
use self::statistics::{decode_table, encode_table};

/// RateAggregator counts start events per second, minute and hour of day.
///
/// Ignored labels still count into the lookup tables; they only stay out
/// of the report windows and the reported total.
#[derive(Debug, Clone)]
pub struct RateAggregator {
    ignored: HashSet<String>,
    tiers: [WindowTier; 3],
    per_second: BTreeMap<NaiveTime, u64>,
    per_minute: BTreeMap<NaiveTime, u64>,
    per_hour: BTreeMap<NaiveTime, u64>,
    total_starts: u64,
    reported_starts: u64,
}

impl Default for RateAggregator {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}

impl RateAggregator {
    /// Creates an aggregator that leaves the given command labels out of
    /// the report.
    pub fn new<I, S>(ignored: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ignored: ignored.into_iter().map(Into::into).collect(),
            tiers: TimeUnit::ALL.map(WindowTier::new),
            per_second: BTreeMap::new(),
            per_minute: BTreeMap::new(),
            per_hour: BTreeMap::new(),
            total_starts: 0,
            reported_starts: 0,
        }
    }

    /// Rebuilds the lookup tables from a statistics side file.
    ///
    /// Window state is not part of the side file; a restored aggregator
    /// only answers queries.
    pub fn from_statistics(stats: &RequestStatistics) -> Result<Self> {
        let mut agg = Self::default();
        agg.per_second = decode_table("requests_per_second", &stats.requests_per_second)?;
        agg.per_minute = decode_table("requests_per_minute", &stats.requests_per_minute)?;
        agg.per_hour = decode_table("requests_per_hour", &stats.requests_per_hour)?;
        agg.total_starts = agg.per_second.values().sum();
        agg.reported_starts = agg.total_starts;
        Ok(agg)
    }

    pub fn is_ignored(&self, command_id: &str) -> bool {
        self.ignored.contains(command_id)
    }

    /// Feeds a raw line through the start-marker side channel.
    ///
    /// Only the marker and the timestamp have to be readable; the rest of
    /// the record may be malformed. Returns true if the line was counted.
    pub fn ingest_line(&mut self, line: &str, out: &mut Vec<RateBucket>) -> bool {
        if !is_start_marker(line) {
            return false;
        }
        let Ok(ts) = parse_timestamp(line) else {
            return false;
        };
        let reported = self.ignored.is_empty() || !self.is_ignored(extract_command(line));
        self.count(ts, reported, out);
        true
    }

    /// Counts one start event. Buckets whose window closed are appended to `out`.
    pub fn ingest_start_event(&mut self, ts: NaiveDateTime, out: &mut Vec<RateBucket>) {
        self.count(ts, true, out);
    }

    fn count(&mut self, ts: NaiveDateTime, reported: bool, out: &mut Vec<RateBucket>) {
        let t = ts.time();
        *self.per_second.entry(TimeUnit::Second.truncate(t)).or_default() += 1;
        *self.per_minute.entry(TimeUnit::Minute.truncate(t)).or_default() += 1;
        *self.per_hour.entry(TimeUnit::Hour.truncate(t)).or_default() += 1;
        self.total_starts += 1;

        if reported {
            for tier in &mut self.tiers {
                tier.record(ts, out);
            }
            self.reported_starts += 1;
        }
    }

    /// Emits every partially filled window.
    pub fn force_flush_all(&mut self, out: &mut Vec<RateBucket>) {
        for tier in &mut self.tiers {
            tier.force_flush(out);
        }
    }

    /// Returns `(per_second, per_minute)` counts for the bucket of `ts`.
    pub fn query(&self, ts: NaiveDateTime) -> (u64, u64) {
        let t = ts.time();
        (
            lookup(&self.per_second, TimeUnit::Second.truncate(t)),
            lookup(&self.per_minute, TimeUnit::Minute.truncate(t)),
        )
    }

    #[cfg(test)]
    fn query_hour(&self, ts: NaiveDateTime) -> u64 {
        lookup(&self.per_hour, TimeUnit::Hour.truncate(ts.time()))
    }

    pub fn total_starts(&self) -> u64 {
        self.total_starts
    }

    /// Starts that went into the report windows.
    pub fn reported_starts(&self) -> u64 {
        self.reported_starts
    }

    /// Serializable copy of the lookup tables.
    pub fn snapshot(&self) -> RequestStatistics {
        RequestStatistics {
            requests_per_second: encode_table(&self.per_second),
            requests_per_minute: encode_table(&self.per_minute),
            requests_per_hour: encode_table(&self.per_hour),
        }
    }

    /// Clears all counters and windows, keeping the ignore list.
    pub fn reset(&mut self) {
        self.per_second.clear();
        self.per_minute.clear();
        self.per_hour.clear();
        for tier in &mut self.tiers {
            tier.reset();
        }
        self.total_starts = 0;
        self.reported_starts = 0;
    }
}

fn lookup(table: &BTreeMap<NaiveTime, u64>, key: NaiveTime) -> u64 {
    table.get(&key).copied().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32, milli: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 12, 20)
            .and_then(|d| d.and_hms_milli_opt(h, m, s, milli))
            .expect("valid timestamp")
    }

    #[test]
    fn test_query_counts() {
        let mut agg = RateAggregator::default();
        let mut out = Vec::new();
        agg.ingest_start_event(at(10, 0, 0, 100), &mut out);
        agg.ingest_start_event(at(10, 0, 0, 800), &mut out);
        agg.ingest_start_event(at(10, 0, 30, 0), &mut out);

        assert_eq!(agg.query(at(10, 0, 0, 999)), (2, 3));
        assert_eq!(agg.query(at(10, 0, 30, 500)), (1, 3));
        assert_eq!(agg.query(at(11, 0, 0, 0)), (0, 0));
        assert_eq!(agg.query_hour(at(10, 59, 0, 0)), 3);
    }

    #[test]
    fn test_bucket_sum_equals_start_count() {
        let mut agg = RateAggregator::default();
        let mut out = Vec::new();
        let mut starts = 0u64;
        for i in 0..500u32 {
            let ts = at(10 + i / 200, (i * 7) % 60, (i * 13) % 60, (i * 37) % 1000);
            agg.ingest_start_event(ts, &mut out);
            starts += 1;
        }
        agg.force_flush_all(&mut out);

        for unit in TimeUnit::ALL {
            let sum: u64 = out.iter().filter(|b| b.unit == unit).map(|b| b.count).sum();
            assert_eq!(sum, starts, "unit {unit:?}");
        }
        assert_eq!(agg.total_starts(), starts);
    }

    #[test]
    fn test_emitted_starts_non_decreasing() {
        let mut agg = RateAggregator::default();
        let mut out = Vec::new();
        let seconds = [0u32, 1, 1, 0, 3, 2, 10, 9, 61, 60, 125];
        for s in seconds {
            agg.ingest_start_event(at(10, s / 60, s % 60, 0), &mut out);
        }
        agg.force_flush_all(&mut out);

        for unit in TimeUnit::ALL {
            let starts: Vec<_> = out
                .iter()
                .filter(|b| b.unit == unit)
                .map(|b| b.bucket_start)
                .collect();
            assert!(starts.windows(2).all(|w| w[0] <= w[1]), "unit {unit:?}: {starts:?}");
        }
    }

    #[test]
    fn test_ingest_line_side_channel() {
        let mut agg = RateAggregator::default();
        let mut out = Vec::new();
        assert!(agg.ingest_line("[?] 2021-12-20 10:00:00 CMD-START ID_A", &mut out));
        assert!(!agg.ingest_line("[1] 2021-12-20 10:00:00 CMD-ENDE ID_A", &mut out));
        assert!(!agg.ingest_line("[1] CMD-START no timestamp", &mut out));
        assert_eq!(agg.total_starts(), 1);
    }

    #[test]
    fn test_ignored_commands() {
        let mut agg = RateAggregator::new(["ID_REQ_KC_STORE7D3BPACKET"]);
        let mut out = Vec::new();
        assert!(agg.ingest_line(
            "[1] 2021-12-20 10:00:00 CMD-START ID_REQ_KC_STORE7D3BPACKET",
            &mut out
        ));
        assert!(agg.ingest_line("[1] 2021-12-20 10:00:00 CMD-START ID_A", &mut out));
        agg.force_flush_all(&mut out);

        // Tables keep every start; the report leaves the ignored one out.
        assert_eq!(agg.query(at(10, 0, 0, 0)), (2, 2));
        assert_eq!(agg.snapshot().requests_per_second.get("10:00:00"), Some(&2));
        assert_eq!(agg.total_starts(), 2);
        assert_eq!(agg.reported_starts(), 1);
        for unit in TimeUnit::ALL {
            let sum: u64 = out.iter().filter(|b| b.unit == unit).map(|b| b.count).sum();
            assert_eq!(sum, 1, "unit {unit:?}");
        }
    }

    #[test]
    fn test_snapshot_restore_preserves_queries() {
        let mut agg = RateAggregator::default();
        let mut out = Vec::new();
        agg.ingest_start_event(at(23, 59, 59, 500), &mut out);
        agg.ingest_start_event(at(0, 0, 0, 100), &mut out);

        let snapshot = agg.snapshot();
        assert_eq!(snapshot.requests_per_second.get("23:59:59"), Some(&1));
        assert_eq!(snapshot.requests_per_minute.get("00:00:00"), Some(&1));

        let restored = RateAggregator::from_statistics(&snapshot).expect("restore");
        assert_eq!(restored.query(at(23, 59, 59, 0)), agg.query(at(23, 59, 59, 0)));
        assert_eq!(restored.query_hour(at(0, 30, 0, 0)), 1);
        assert_eq!(restored.total_starts(), 2);
    }

    #[test]
    fn test_days_alias_into_one_bucket() {
        let mut agg = RateAggregator::default();
        let mut out = Vec::new();
        let day1 = at(10, 0, 0, 0);
        let day2 = day1 + chrono::Duration::days(1);
        agg.ingest_start_event(day1, &mut out);
        agg.ingest_start_event(day2, &mut out);
        assert_eq!(agg.query(day1), (2, 2));
    }

    #[test]
    fn test_reset() {
        let mut agg = RateAggregator::new(["ID_X"]);
        let mut out = Vec::new();
        agg.ingest_start_event(at(10, 0, 0, 0), &mut out);
        agg.reset();
        agg.force_flush_all(&mut out);
        assert!(out.is_empty());
        assert_eq!(agg.query(at(10, 0, 0, 0)), (0, 0));
        assert!(agg.is_ignored("ID_X"));
    }
}
