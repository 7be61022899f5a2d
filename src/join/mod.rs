//! Nearest-second join of completed requests against external series.

pub mod flow;
pub mod netdata;
pub mod resource;

use chrono::{FixedOffset, NaiveDateTime};

use crate::dataset::row::TrainingRow;
use crate::lifecycle::CompletedRequest;
use crate::rate::RateAggregator;

pub use self::flow::{load_flow_file, SwitchFlowSeries, SwitchFlowStats};
pub use self::netdata::{fetch_or_fallback, NetdataClient, ResourceSeriesSource};
pub use self::resource::{resolve_cpu_usage, round_micros_half_up, ResourceSeries, CPU_SENTINEL};

/// Epoch microseconds of a naive log timestamp taken at `offset`.
pub fn epoch_micros(ts: NaiveDateTime, offset: FixedOffset) -> i64 {
    ts.and_utc().timestamp_micros() - i64::from(offset.local_minus_utc()) * 1_000_000
}

/// Whole epoch second nearest to `ts`.
pub fn nearest_second(ts: NaiveDateTime, offset: FixedOffset) -> i64 {
    round_micros_half_up(epoch_micros(ts, offset))
}

/// Counters of one enrichment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinStats {
    pub rows: u64,
    pub cpu_fallbacks: u64,
    pub flow_misses: u64,
}

/// TimeSeriesJoiner turns completed requests into training rows.
///
/// Every enrichment source is optional. Without CPU data the sentinel is
/// recorded, without rate tables the rates are 0, and without flow data
/// the switch columns stay empty.
pub struct TimeSeriesJoiner {
    offset: FixedOffset,
    cpu: Option<ResourceSeries>,
    rates: Option<RateAggregator>,
    flow: Option<SwitchFlowSeries>,
    stats: JoinStats,
}

impl TimeSeriesJoiner {
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            offset,
            cpu: None,
            rates: None,
            flow: None,
            stats: JoinStats::default(),
        }
    }

    pub fn with_cpu(mut self, cpu: Option<ResourceSeries>) -> Self {
        self.cpu = cpu;
        self
    }

    pub fn with_rates(mut self, rates: Option<RateAggregator>) -> Self {
        self.rates = rates;
        self
    }

    pub fn with_flow(mut self, flow: Option<SwitchFlowSeries>) -> Self {
        self.flow = flow;
        self
    }

    pub fn stats(&self) -> JoinStats {
        self.stats
    }

    pub fn enrich(&mut self, req: &CompletedRequest) -> TrainingRow {
        let second = nearest_second(req.timestamp, self.offset);

        let sample = self.cpu.as_ref().and_then(|cpu| cpu.at_second(second));
        let cpu_usage = resolve_cpu_usage(sample);
        if sample.map_or(true, f64::is_nan) {
            self.stats.cpu_fallbacks += 1;
        }

        let mut row = TrainingRow::from_request(req, cpu_usage);

        if let Some(rates) = &self.rates {
            let (per_second, per_minute) = rates.query(req.timestamp);
            row.requests_per_second = per_second;
            row.requests_per_minute = per_minute;
        }

        if let Some(flow) = &self.flow {
            row.switch_id = Some(flow.switch_id().to_string());
            match flow.at_second(second) {
                Some(sample) => {
                    row.bytes_per_second = Some(sample.bytes_per_second);
                    row.packets_per_second = Some(sample.packets_per_second);
                }
                None => self.stats.flow_misses += 1,
            }
        }

        self.stats.rows += 1;
        row
    }
}
