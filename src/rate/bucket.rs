use std::fmt;

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};

/// Bucket width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
}

impl TimeUnit {
    pub const ALL: [TimeUnit; 3] = [Self::Second, Self::Minute, Self::Hour];

    pub const fn seconds(self) -> u32 {
        match self {
            Self::Second => 1,
            Self::Minute => 60,
            Self::Hour => 3_600,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::seconds(i64::from(self.seconds()))
    }

    /// Truncates a time of day to the start of its bucket.
    pub fn truncate(self, t: NaiveTime) -> NaiveTime {
        let secs = t.num_seconds_from_midnight();
        let start = secs - secs % self.seconds();
        NaiveTime::from_num_seconds_from_midnight_opt(start, 0).unwrap_or(NaiveTime::MIN)
    }

    pub fn truncate_datetime(self, ts: NaiveDateTime) -> NaiveDateTime {
        ts.date().and_time(self.truncate(ts.time()))
    }

    /// Abbreviation used in the workload report (`RPS`, `RPM`, `RPH`).
    pub const fn report_label(self) -> &'static str {
        match self {
            Self::Second => "RPS",
            Self::Minute => "RPM",
            Self::Hour => "RPH",
        }
    }

    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Second => "s",
            Self::Minute => "min",
            Self::Hour => "h",
        }
    }
}

/// Count of start events in one flushed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBucket {
    pub unit: TimeUnit,
    /// Window start, time of day only.
    pub bucket_start: NaiveTime,
    pub count: u64,
}

impl fmt::Display for RateBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}: {}/{}",
            self.bucket_start.format("%H:%M:%S"),
            self.unit.report_label(),
            self.count,
            self.unit.suffix()
        )
    }
}

/// Current window of one unit.
///
/// The window is anchored on a full timestamp so that ordering survives a
/// midnight crossing; only the emitted bucket drops the date.
#[derive(Debug, Clone)]
pub(crate) struct WindowTier {
    unit: TimeUnit,
    window_start: Option<NaiveDateTime>,
    count: u64,
}

impl WindowTier {
    pub(crate) fn new(unit: TimeUnit) -> Self {
        Self {
            unit,
            window_start: None,
            count: 0,
        }
    }

    /// Counts one event, flushing the current window first when `ts`
    /// reaches or passes its end. Earlier timestamps stay in the current
    /// window.
    pub(crate) fn record(&mut self, ts: NaiveDateTime, out: &mut Vec<RateBucket>) {
        match self.window_start {
            None => self.window_start = Some(self.unit.truncate_datetime(ts)),
            Some(start) if ts >= start + self.unit.duration() => {
                self.emit(start, out);
                self.window_start = Some(self.unit.truncate_datetime(ts));
            }
            Some(_) => {}
        }
        self.count += 1;
    }

    /// Emits the partial window, if any.
    pub(crate) fn force_flush(&mut self, out: &mut Vec<RateBucket>) {
        if let Some(start) = self.window_start.take() {
            self.emit(start, out);
        }
    }

    pub(crate) fn reset(&mut self) {
        self.window_start = None;
        self.count = 0;
    }

    fn emit(&mut self, start: NaiveDateTime, out: &mut Vec<RateBucket>) {
        if self.count > 0 {
            out.push(RateBucket {
                unit: self.unit,
                bucket_start: start.time(),
                count: self.count,
            });
        }
        self.count = 0;
    }
}
