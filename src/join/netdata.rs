use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{FixedOffset, NaiveDate, NaiveTime};
use tracing::{debug, warn};

use crate::config::MetricsServiceConfig;

use super::epoch_micros;
use super::resource::{DataResponse, ResourceSeries};

/// Source of the per-day resource series.
pub trait ResourceSeriesSource: Send + Sync {
    /// Fetch the full series of `day`.
    fn get_series(
        &self,
        day: NaiveDate,
    ) -> impl std::future::Future<Output = Result<ResourceSeries>> + Send;
}

/// HTTP client for the netdata `data` endpoint.
pub struct NetdataClient {
    http: reqwest::Client,
    endpoint: String,
    chart: String,
    dimension: String,
    offset: FixedOffset,
}

impl NetdataClient {
    /// Create a new client. `offset` is the UTC offset of the day boundaries.
    pub fn new(cfg: &MetricsServiceConfig, offset: FixedOffset) -> Result<Self> {
        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(5)
        } else {
            cfg.timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            chart: cfg.chart.clone(),
            dimension: cfg.dimension.clone(),
            offset,
        })
    }

    fn data_path(&self, day: NaiveDate) -> String {
        let (after, before) = day_bounds(day, self.offset);
        format!(
            "/data?chart={}&dimensions={}&before={before}&after={after}&options=seconds",
            self.chart, self.dimension
        )
    }

    /// Perform a GET request and deserialize the JSON response.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.endpoint, path);

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("requesting {path}"))?;

        let status_code = response.status();

        if !status_code.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("unexpected status {} from {}: {}", status_code, path, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("decoding response from {path}"))
    }
}

impl ResourceSeriesSource for NetdataClient {
    async fn get_series(&self, day: NaiveDate) -> Result<ResourceSeries> {
        debug!(%day, chart = %self.chart, "fetching resource series");

        let resp: DataResponse = self
            .get_json(&self.data_path(day))
            .await
            .with_context(|| format!("fetching {} for {day}", self.chart))?;

        Ok(ResourceSeries::from_data_response(&resp))
    }
}

/// Epoch seconds of the first and last second of `day`.
pub fn day_bounds(day: NaiveDate, offset: FixedOffset) -> (i64, i64) {
    let start = day.and_time(NaiveTime::MIN);
    let end = start + chrono::Duration::seconds(86_399);
    (
        epoch_micros(start, offset).div_euclid(1_000_000),
        epoch_micros(end, offset).div_euclid(1_000_000),
    )
}

/// Fetches the series of `day`, bounded by `timeout`.
///
/// Any failure yields `None`; callers then use the sentinel for the
/// whole file.
pub async fn fetch_or_fallback<S: ResourceSeriesSource>(
    source: &S,
    day: NaiveDate,
    timeout: Duration,
) -> Option<ResourceSeries> {
    let started = Instant::now();
    match tokio::time::timeout(timeout, source.get_series(day)).await {
        Ok(Ok(series)) => {
            debug!(
                %day,
                samples = series.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "resource series fetched"
            );
            Some(series)
        }
        Ok(Err(e)) => {
            warn!(%day, error = %e, "resource series unavailable, using sentinel");
            None
        }
        Err(_) => {
            warn!(%day, timeout_ms = timeout.as_millis() as u64, "resource series timed out, using sentinel");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::resource::ResourceSample;

    struct FixedSource(Option<f64>);

    impl ResourceSeriesSource for FixedSource {
        async fn get_series(&self, _day: NaiveDate) -> Result<ResourceSeries> {
            match self.0 {
                Some(value) => Ok(ResourceSeries::from_samples([ResourceSample {
                    timestamp: 100.0,
                    value,
                }])),
                None => bail!("service down"),
            }
        }
    }

    struct SlowSource;

    impl ResourceSeriesSource for SlowSource {
        async fn get_series(&self, _day: NaiveDate) -> Result<ResourceSeries> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ResourceSeries::default())
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 12, 20).expect("valid date")
    }

    #[test]
    fn test_day_bounds_utc() {
        let utc = FixedOffset::east_opt(0).expect("offset");
        let (after, before) = day_bounds(day(), utc);
        assert_eq!(after, 1_639_958_400);
        assert_eq!(before, 1_639_958_400 + 86_399);
    }

    #[test]
    fn test_day_bounds_with_offset() {
        let cet = FixedOffset::east_opt(3_600).expect("offset");
        let (after, _) = day_bounds(day(), cet);
        assert_eq!(after, 1_639_958_400 - 3_600);
    }

    #[test]
    fn test_data_path() {
        let cfg = MetricsServiceConfig {
            enabled: true,
            endpoint: "http://netdata:19999/api/v1/".to_string(),
            ..MetricsServiceConfig::default()
        };
        let client =
            NetdataClient::new(&cfg, FixedOffset::east_opt(0).expect("offset")).expect("client");
        assert_eq!(client.endpoint, "http://netdata:19999/api/v1");
        assert_eq!(
            client.data_path(day()),
            "/data?chart=system.cpu&dimensions=system&before=1640044799&after=1639958400&options=seconds"
        );
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let series = fetch_or_fallback(&FixedSource(Some(3.0)), day(), Duration::from_secs(1))
            .await
            .expect("series");
        assert_eq!(series.nearest(100.2), Some(3.0));
    }

    #[tokio::test]
    async fn test_fetch_error_falls_back() {
        let series = fetch_or_fallback(&FixedSource(None), day(), Duration::from_secs(1)).await;
        assert!(series.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_falls_back() {
        let series = fetch_or_fallback(&SlowSource, day(), Duration::from_secs(5)).await;
        assert!(series.is_none());
    }
}
