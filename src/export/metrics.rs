use std::path::Path;

use anyhow::{Context, Result};
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};

use crate::pipeline::PartialFile;

const NAMESPACE: &str = "cmdtrace";

/// Prometheus counters describing one pipeline run.
///
/// The run is a batch job, so nothing is served; the registry is rendered
/// in text format and optionally written for node_exporter's textfile
/// collector.
pub struct PipelineMetrics {
    registry: Registry,

    /// Source files by outcome (processed, skipped, failed).
    pub files: CounterVec,
    /// Rows committed to the store.
    pub rows_written: Counter,
    /// Completed requests reconstructed from raw logs.
    pub requests_completed: Counter,
    /// Anomalies by kind.
    pub anomalies: CounterVec,
    /// Lines carrying a marker that could not be parsed.
    pub malformed_lines: Counter,
    /// Rows that received the CPU sentinel.
    pub cpu_fallbacks: Counter,
    /// Unix time of the last finished run.
    pub last_run_timestamp: Gauge,
}

impl PipelineMetrics {
    /// Creates a fresh registry with all metrics registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let files = CounterVec::new(
            Opts::new("files_total", "Source files handled, by outcome.").namespace(NAMESPACE),
            &["outcome"],
        )?;
        let rows_written = Counter::with_opts(
            Opts::new("rows_written_total", "Training rows committed to the store.")
                .namespace(NAMESPACE),
        )?;
        let requests_completed = Counter::with_opts(
            Opts::new(
                "requests_completed_total",
                "Completed requests reconstructed from command logs.",
            )
            .namespace(NAMESPACE),
        )?;
        let anomalies = CounterVec::new(
            Opts::new("anomalies_total", "Event stream anomalies, by kind.").namespace(NAMESPACE),
            &["kind"],
        )?;
        let malformed_lines = Counter::with_opts(
            Opts::new(
                "malformed_lines_total",
                "Marked lines that failed to parse.",
            )
            .namespace(NAMESPACE),
        )?;
        let cpu_fallbacks = Counter::with_opts(
            Opts::new(
                "cpu_fallbacks_total",
                "Rows recorded with the unknown CPU sentinel.",
            )
            .namespace(NAMESPACE),
        )?;
        let last_run_timestamp = Gauge::with_opts(
            Opts::new(
                "last_run_timestamp_seconds",
                "Unix time at which the last run finished.",
            )
            .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(files.clone()))?;
        registry.register(Box::new(rows_written.clone()))?;
        registry.register(Box::new(requests_completed.clone()))?;
        registry.register(Box::new(anomalies.clone()))?;
        registry.register(Box::new(malformed_lines.clone()))?;
        registry.register(Box::new(cpu_fallbacks.clone()))?;
        registry.register(Box::new(last_run_timestamp.clone()))?;

        Ok(Self {
            registry,
            files,
            rows_written,
            requests_completed,
            anomalies,
            malformed_lines,
            cpu_fallbacks,
            last_run_timestamp,
        })
    }

    pub fn file_processed(&self) {
        self.files.with_label_values(&["processed"]).inc();
    }

    pub fn file_skipped(&self) {
        self.files.with_label_values(&["skipped"]).inc();
    }

    pub fn file_failed(&self) {
        self.files.with_label_values(&["failed"]).inc();
    }

    pub fn anomaly(&self, kind: &str) {
        self.anomalies.with_label_values(&[kind]).inc();
    }

    /// Renders all metrics in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("encoding metrics")?;
        String::from_utf8(buffer).context("metrics are not UTF-8")
    }

    /// Writes the metrics to `path` through a partial sibling, so a collector
    /// never reads a half-written file.
    pub fn write_textfile(&self, path: &Path) -> Result<()> {
        let mut out = PartialFile::create(path)?;
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut out)
            .with_context(|| format!("writing metrics to {}", path.display()))?;
        out.commit()
    }
}
