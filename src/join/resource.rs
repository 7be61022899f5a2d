use std::collections::HashMap;

use serde::Deserialize;

/// CPU usage recorded when no measurement is available.
pub const CPU_SENTINEL: f64 = 1.0;

/// Rounds epoch seconds to the nearest whole second, halves rounding up.
pub fn round_half_up(secs: f64) -> i64 {
    (secs + 0.5).floor() as i64
}

/// Rounds epoch microseconds to the nearest whole second, halves rounding up.
pub fn round_micros_half_up(micros: i64) -> i64 {
    (micros + 500_000).div_euclid(1_000_000)
}

/// A single resource measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    /// Epoch seconds.
    pub timestamp: f64,
    pub value: f64,
}

/// Sparse resource series keyed by whole epoch second.
#[derive(Debug, Clone, Default)]
pub struct ResourceSeries {
    by_second: HashMap<i64, f64>,
}

impl ResourceSeries {
    pub fn from_samples<I: IntoIterator<Item = ResourceSample>>(samples: I) -> Self {
        let by_second = samples
            .into_iter()
            .map(|s| (round_half_up(s.timestamp), s.value))
            .collect();
        Self { by_second }
    }

    /// Builds a series from a metrics-service data response.
    ///
    /// The first column is the time; the value is the sum of the remaining
    /// non-null columns, or NaN if all of them are null.
    pub fn from_data_response(resp: &DataResponse) -> Self {
        let samples = resp.data.iter().filter_map(|row| {
            let (time, values) = row.split_first()?;
            let time = (*time)?;
            let mut present = values.iter().flatten().peekable();
            let value = if present.peek().is_some() {
                present.sum::<f64>()
            } else {
                f64::NAN
            };
            Some(ResourceSample {
                timestamp: time,
                value,
            })
        });
        Self::from_samples(samples)
    }

    /// Exact lookup of an already-rounded second.
    pub fn at_second(&self, second: i64) -> Option<f64> {
        self.by_second.get(&second).copied()
    }

    /// Sample nearest to `epoch_secs`.
    pub fn nearest(&self, epoch_secs: f64) -> Option<f64> {
        self.at_second(round_half_up(epoch_secs))
    }

    pub fn len(&self) -> usize {
        self.by_second.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_second.is_empty()
    }
}

/// Maps a looked-up sample to the stored CPU usage.
///
/// Missing and NaN samples become [`CPU_SENTINEL`]; measured values,
/// including `0.0`, pass through.
pub fn resolve_cpu_usage(sample: Option<f64>) -> f64 {
    match sample {
        Some(v) if !v.is_nan() => v,
        _ => CPU_SENTINEL,
    }
}

/// Body of a metrics-service `data` request.
#[derive(Debug, Clone, Deserialize)]
pub struct DataResponse {
    pub labels: Vec<String>,
    pub data: Vec<Vec<Option<f64>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_up() {
        assert_eq!(round_half_up(100.4), 100);
        assert_eq!(round_half_up(100.5), 101);
        assert_eq!(round_half_up(100.0), 100);
        assert_eq!(round_half_up(-0.5), 0);
    }

    #[test]
    fn test_round_micros_half_up() {
        assert_eq!(round_micros_half_up(100_400_000), 100);
        assert_eq!(round_micros_half_up(100_500_000), 101);
        assert_eq!(round_micros_half_up(99_999_999), 100);
    }

    #[test]
    fn test_nearest_rounds_then_looks_up() {
        let series = ResourceSeries::from_samples([
            ResourceSample {
                timestamp: 100.0,
                value: 12.5,
            },
            ResourceSample {
                timestamp: 102.0,
                value: 0.0,
            },
        ]);

        assert_eq!(series.nearest(100.4), Some(12.5));
        assert_eq!(series.nearest(100.6), None);
        assert_eq!(series.nearest(101.5), Some(0.0));
        assert_eq!(series.nearest(100.4), series.nearest(100.4));
    }

    #[test]
    fn test_resolve_cpu_usage() {
        assert_eq!(resolve_cpu_usage(None), CPU_SENTINEL);
        assert_eq!(resolve_cpu_usage(Some(f64::NAN)), CPU_SENTINEL);
        assert_eq!(resolve_cpu_usage(Some(0.0)), 0.0);
        assert_eq!(resolve_cpu_usage(Some(42.0)), 42.0);
    }

    #[test]
    fn test_from_data_response() {
        let resp: DataResponse = serde_json::from_str(
            r#"{
                "labels": ["time", "system", "user"],
                "data": [
                    [1639994400, 1.5, 2.0],
                    [1639994401, null, 3.0],
                    [1639994402, null, null]
                ]
            }"#,
        )
        .expect("decode");
        let series = ResourceSeries::from_data_response(&resp);

        assert_eq!(series.len(), 3);
        assert_eq!(series.at_second(1_639_994_400), Some(3.5));
        assert_eq!(series.at_second(1_639_994_401), Some(3.0));
        assert!(series
            .at_second(1_639_994_402)
            .is_some_and(f64::is_nan));
    }
}
