//! Per-file orchestration of the conversion and ingestion passes.
//!
//! Files are handled strictly one after another in path order. A failing
//! file is logged and counted and the run moves on; only an operator abort
//! stops the run.

pub mod filter;
pub mod output;
pub mod source;

use std::fs::File;
use std::io::{BufRead, BufReader, Write};

use anyhow::{Context, Result};
use chrono::FixedOffset;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cmdlog::{parse_line, CommandLogReader, EventKind, LineStats, ParseError};
use crate::config::Config;
use crate::dataset::{
    parse_converted_line, write_converted_line, write_features, DatasetWriter, TrainingRow,
    TrainingStore,
};
use crate::export::PipelineMetrics;
use crate::join::{
    fetch_or_fallback, load_flow_file, ResourceSeriesSource, SwitchFlowSeries, TimeSeriesJoiner,
};
use crate::lifecycle::{Anomaly, AnomalyHandler, CompletedRequest, Decision, LifecycleTracker};
use crate::rate::{RateAggregator, RateBucket, RequestStatistics};
use crate::registry::CommandRegistry;

pub use self::filter::RequestFilter;
pub use self::output::PartialFile;
pub use self::source::{
    date_from_name, discover_converted, discover_raw, from_paths, SourceFile,
};

/// Side file with the rate tables of one day.
pub const STATISTICS_STEM: &str = "request_statistics";
/// Side file with the switch flow counters of one day.
pub const FLOW_STEM: &str = "switch_flow_stats";
/// Workload report of one day.
pub const REPORT_STEM: &str = "Requests_per_time_unit";
pub const REQUEST_NAMES_FILE: &str = "Request_Names.log";
/// Raw lines of the filtered command label.
pub const REQUEST_FILTER_FILE: &str = "Request_Statistics.log";
pub const FEATURES_FILE: &str = "features.jsonl";
pub const COMMAND_CODES_FILE: &str = "command_codes.json";

/// Errors that stop the whole run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("aborted by operator while processing {file}")]
    Aborted { file: String },
}

/// Which pass to run over the source directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Raw logs to converted logs and side files.
    Convert,
    /// Converted logs into the store.
    Ingest,
    /// Raw logs straight into the store, writing the converted outputs too.
    Run,
}

impl Pass {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Convert => "convert",
            Self::Ingest => "ingest",
            Self::Run => "run",
        }
    }
}

/// Outcome of one source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Processed { rows: u64 },
    /// The file's date was already ingested.
    Skipped,
}

/// Totals of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub rows_written: u64,
    pub requests: u64,
    pub anomalies: u64,
    pub malformed_lines: u64,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Everything one scan of a raw log produces.
#[derive(Debug, Default)]
pub struct TrackedFile {
    pub requests: Vec<CompletedRequest>,
    /// Flushed rate windows, in emission order.
    pub buckets: Vec<RateBucket>,
    pub rates: RateAggregator,
    pub stats: LineStats,
}

/// Pipeline owns the run-scoped state: store, registry, metrics and the
/// anomaly policy.
pub struct Pipeline<S, C> {
    cfg: Config,
    offset: FixedOffset,
    writer: DatasetWriter<S>,
    cpu_source: Option<C>,
    handler: Box<dyn AnomalyHandler>,
    registry: CommandRegistry,
    filter: Option<RequestFilter>,
    metrics: PipelineMetrics,
    summary: RunSummary,
}

impl<S: TrainingStore, C: ResourceSeriesSource> Pipeline<S, C> {
    pub fn new(
        cfg: Config,
        store: S,
        cpu_source: Option<C>,
        handler: Box<dyn AnomalyHandler>,
    ) -> Result<Self> {
        let offset = cfg.time.offset().context("resolving time.utc_offset")?;
        let metrics = PipelineMetrics::new().context("creating pipeline metrics")?;

        Ok(Self {
            cfg,
            offset,
            writer: DatasetWriter::new(store),
            cpu_source,
            handler,
            registry: CommandRegistry::new(),
            filter: None,
            metrics,
            summary: RunSummary::default(),
        })
    }

    pub fn writer(&self) -> &DatasetWriter<S> {
        &self.writer
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Runs `pass` over every discovered source file.
    ///
    /// Per-file failures are counted in the summary. An operator abort is
    /// returned as [`PipelineError::Aborted`].
    pub async fn execute(&mut self, pass: Pass) -> Result<RunSummary> {
        let files = if !self.cfg.source.files.is_empty() {
            from_paths(&self.cfg.source.files)?
        } else {
            match pass {
                Pass::Convert | Pass::Run => discover_raw(&self.cfg.source)?,
                Pass::Ingest => discover_converted(&self.cfg.source)?,
            }
        };
        info!(pass = pass.as_str(), files = files.len(), "starting pass");

        for file in &files {
            let result = match pass {
                Pass::Convert => self.convert_file(file),
                Pass::Ingest => self.ingest_file(file).await,
                Pass::Run => self.run_file(file).await,
            };

            match result {
                Ok(FileOutcome::Processed { rows }) => {
                    self.summary.processed += 1;
                    self.summary.rows_written += rows;
                    self.metrics.file_processed();
                    self.metrics.rows_written.inc_by(rows as f64);
                }
                Ok(FileOutcome::Skipped) => {
                    self.summary.skipped += 1;
                    self.metrics.file_skipped();
                }
                Err(e) if e.downcast_ref::<PipelineError>().is_some() => return Err(e),
                Err(e) => {
                    error!(file = %file.label(), error = %format!("{e:#}"), "file failed");
                    self.summary.failed += 1;
                    self.metrics.file_failed();
                }
            }
        }

        Ok(self.summary)
    }

    /// Converts one raw log into its converted log, rate statistics and
    /// workload report.
    pub fn convert_file(&mut self, file: &SourceFile) -> Result<FileOutcome> {
        let tracked = self.track_path(file)?;
        self.write_conversion(file, &tracked)?;
        Ok(FileOutcome::Processed { rows: 0 })
    }

    /// Loads one converted log into the store.
    pub async fn ingest_file(&mut self, file: &SourceFile) -> Result<FileOutcome> {
        if self.writer.already_ingested(file.date).await? {
            info!(file = %file.label(), date = %file.date, "date already ingested, skipping");
            return Ok(FileOutcome::Skipped);
        }

        let requests = self.read_converted(file)?;
        let rows = self.enrich_and_write(file, &requests, None).await?;
        Ok(FileOutcome::Processed { rows })
    }

    /// Converts one raw log and loads it into the store in the same pass.
    pub async fn run_file(&mut self, file: &SourceFile) -> Result<FileOutcome> {
        if self.writer.already_ingested(file.date).await? {
            info!(file = %file.label(), date = %file.date, "date already ingested, skipping");
            return Ok(FileOutcome::Skipped);
        }

        let tracked = self.track_path(file)?;
        self.write_conversion(file, &tracked)?;

        let TrackedFile {
            requests, rates, ..
        } = tracked;
        let rows = self.enrich_and_write(file, &requests, Some(rates)).await?;
        Ok(FileOutcome::Processed { rows })
    }

    /// Scans a raw command log once, feeding the lifecycle tracker and the
    /// rate aggregator from the same lines.
    pub fn track<R: BufRead>(&mut self, reader: R, label: &str) -> Result<TrackedFile> {
        self.open_filter()?;
        let mut lines = CommandLogReader::new(reader, label);
        let mut tracker = LifecycleTracker::new();
        let mut tracked = TrackedFile {
            rates: RateAggregator::new(self.cfg.rate.ignored_commands.iter().cloned()),
            ..TrackedFile::default()
        };

        while let Some(line) = lines.next_line()? {
            tracked.rates.ingest_line(line, &mut tracked.buckets);
            if let Some(filter) = self.filter.as_mut() {
                filter.process_line(line)?;
            }

            let outcome = parse_line(line);
            tracked.stats.record(&outcome);
            let event = match outcome {
                Ok(event) => event,
                Err(ParseError::NoMarker) => continue,
                Err(e) => {
                    debug!(file = %label, line = lines.lines_read(), error = %e, "skipping malformed line");
                    continue;
                }
            };

            if event.kind == EventKind::Start {
                self.registry.intern(&event.command_id);
            }

            match tracker.handle(&event) {
                Ok(Some(request)) => tracked.requests.push(request),
                Ok(None) => {}
                Err(anomaly) => self.on_anomaly(&anomaly, label)?,
            }
        }

        tracked.rates.force_flush_all(&mut tracked.buckets);
        for anomaly in tracker.finish() {
            self.on_anomaly(&anomaly, label)?;
        }

        let requests = tracked.requests.len() as u64;
        self.summary.requests += requests;
        self.summary.malformed_lines += tracked.stats.malformed;
        self.metrics.requests_completed.inc_by(requests as f64);
        self.metrics.malformed_lines.inc_by(tracked.stats.malformed as f64);

        info!(
            file = %label,
            lines = tracked.stats.lines,
            starts = tracked.stats.starts,
            ends = tracked.stats.ends,
            malformed = tracked.stats.malformed,
            requests,
            "log scanned"
        );
        Ok(tracked)
    }

    /// Writes `features.jsonl` and `command_codes.json` from all persisted
    /// rows. Returns the number of feature rows.
    pub async fn export_features(&mut self) -> Result<u64> {
        self.load_request_names()?;

        let rows = self
            .writer
            .store()
            .fetch_all()
            .await
            .context("reading training rows")?;

        let dir = self.cfg.output_directory.clone();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;

        let mut features = PartialFile::create(&dir.join(FEATURES_FILE))?;
        let written = write_features(&rows, &mut self.registry, &mut features)?;
        let mut codes = PartialFile::create(&dir.join(COMMAND_CODES_FILE))?;
        self.registry.write_codes(&mut codes)?;
        features.commit()?;
        codes.commit()?;

        info!(rows = written, commands = self.registry.len(), "features exported");
        Ok(written)
    }

    /// Writes the run-wide outputs: request names, the filtered requests
    /// and the metrics textfile.
    pub fn finish(&mut self) -> Result<RunSummary> {
        if let Some(filter) = self.filter.take() {
            filter.commit()?;
        }

        if !self.registry.is_empty() {
            let dir = &self.cfg.output_directory;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating output directory {}", dir.display()))?;
            let mut names = PartialFile::create(&dir.join(REQUEST_NAMES_FILE))?;
            self.registry.write_names(&mut names)?;
            names.commit()?;
        }

        self.metrics
            .last_run_timestamp
            .set(chrono::Utc::now().timestamp() as f64);
        if let Some(path) = &self.cfg.metrics.textfile {
            self.metrics.write_textfile(path)?;
        }

        let s = self.summary;
        info!(
            processed = s.processed,
            skipped = s.skipped,
            failed = s.failed,
            rows = s.rows_written,
            anomalies = s.anomalies,
            "run finished"
        );
        Ok(s)
    }

    fn track_path(&mut self, file: &SourceFile) -> Result<TrackedFile> {
        let handle = File::open(&file.path)
            .with_context(|| format!("opening {}", file.path.display()))?;
        self.track(BufReader::new(handle), &file.label())
    }

    fn open_filter(&mut self) -> Result<()> {
        let Some(command) = &self.cfg.rate.request_filter else {
            return Ok(());
        };
        if self.filter.is_some() {
            return Ok(());
        }
        let dir = &self.cfg.output_directory;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
        self.filter = Some(RequestFilter::create(
            command.clone(),
            &dir.join(REQUEST_FILTER_FILE),
        )?);
        Ok(())
    }

    fn on_anomaly(&mut self, anomaly: &Anomaly, label: &str) -> Result<()> {
        self.summary.anomalies += 1;
        self.metrics.anomaly(anomaly.kind());

        match self.handler.decide(anomaly) {
            Decision::Continue => Ok(()),
            Decision::Abort => Err(PipelineError::Aborted {
                file: label.to_string(),
            }
            .into()),
        }
    }

    fn write_conversion(&self, file: &SourceFile, tracked: &TrackedFile) -> Result<()> {
        let source = &self.cfg.source;
        let converted_path = file.directory().join(format!(
            "{}{}{}",
            source.converted_prefix,
            file.date.format("%Y-%m-%d"),
            source.extension
        ));

        let mut converted = PartialFile::create(&converted_path)?;
        for request in &tracked.requests {
            write_converted_line(&mut converted, request)
                .with_context(|| format!("writing {}", converted_path.display()))?;
        }

        let mut statistics = PartialFile::create(&file.sibling(STATISTICS_STEM, ".json"))?;
        tracked.rates.snapshot().write_to(&mut statistics)?;

        let mut report = PartialFile::create(&file.sibling(REPORT_STEM, &source.extension))?;
        write_report(&mut report, &tracked.buckets, tracked.rates.reported_starts())
            .with_context(|| format!("writing {}", report.target().display()))?;

        converted.commit()?;
        statistics.commit()?;
        report.commit()?;

        info!(
            file = %file.label(),
            requests = tracked.requests.len(),
            starts = tracked.rates.total_starts(),
            reported_starts = tracked.rates.reported_starts(),
            converted = %converted_path.display(),
            "conversion written"
        );
        Ok(())
    }

    fn read_converted(&mut self, file: &SourceFile) -> Result<Vec<CompletedRequest>> {
        let label = file.label();
        let handle = File::open(&file.path)
            .with_context(|| format!("opening {}", file.path.display()))?;
        let mut lines = CommandLogReader::new(BufReader::new(handle), label.as_str());

        let mut requests = Vec::new();
        let mut malformed = 0u64;
        while let Some(line) = lines.next_line()? {
            if line.trim().is_empty() {
                continue;
            }
            match parse_converted_line(line) {
                Ok(request) => {
                    self.registry.intern(&request.command_id);
                    requests.push(request);
                }
                Err(e) => {
                    malformed += 1;
                    debug!(file = %label, line = lines.lines_read(), error = %e, "skipping malformed record");
                }
            }
        }

        self.summary.malformed_lines += malformed;
        self.metrics.malformed_lines.inc_by(malformed as f64);
        debug!(file = %label, requests = requests.len(), malformed, "converted log read");
        Ok(requests)
    }

    async fn enrich_and_write(
        &mut self,
        file: &SourceFile,
        requests: &[CompletedRequest],
        rates: Option<RateAggregator>,
    ) -> Result<u64> {
        let mut joiner = self.joiner_for(file, rates).await;
        let rows: Vec<TrainingRow> = requests.iter().map(|r| joiner.enrich(r)).collect();
        let stats = joiner.stats();
        self.metrics.cpu_fallbacks.inc_by(stats.cpu_fallbacks as f64);

        let written = self.writer.write_file(&file.label(), &rows).await?;
        info!(
            file = %file.label(),
            rows = written,
            cpu_fallbacks = stats.cpu_fallbacks,
            flow_misses = stats.flow_misses,
            "file ingested"
        );
        Ok(written)
    }

    async fn joiner_for(
        &self,
        file: &SourceFile,
        rates: Option<RateAggregator>,
    ) -> TimeSeriesJoiner {
        let mut joiner = TimeSeriesJoiner::new(self.offset);

        if let Some(source) = &self.cpu_source {
            let cpu = fetch_or_fallback(source, file.date, self.cfg.metrics_service.timeout).await;
            joiner = joiner.with_cpu(cpu);
        }

        if !self.cfg.enrichment.enabled {
            return joiner;
        }

        let rates = rates.or_else(|| load_rates(file));
        joiner.with_rates(rates).with_flow(load_flow(file))
    }

    fn load_request_names(&mut self) -> Result<()> {
        let path = self.cfg.output_directory.join(REQUEST_NAMES_FILE);
        if !path.exists() {
            return Ok(());
        }
        let handle =
            File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let added = self.registry.read_names(BufReader::new(handle))?;
        debug!(path = %path.display(), added, "request names loaded");
        Ok(())
    }
}

/// Writes the flushed rate windows followed by the start count.
pub fn write_report<W: Write>(out: &mut W, buckets: &[RateBucket], total: u64) -> std::io::Result<()> {
    for bucket in buckets {
        writeln!(out, "{bucket}")?;
    }
    writeln!(out, "Total count: {total}")
}

fn load_rates(file: &SourceFile) -> Option<RateAggregator> {
    let path = file.sibling(STATISTICS_STEM, ".json");
    if !path.exists() {
        warn!(path = %path.display(), "rate statistics missing, rates default to 0");
        return None;
    }

    match RequestStatistics::load(&path).and_then(|s| RateAggregator::from_statistics(&s)) {
        Ok(rates) => Some(rates),
        Err(e) => {
            warn!(path = %path.display(), error = %format!("{e:#}"), "ignoring rate statistics");
            None
        }
    }
}

fn load_flow(file: &SourceFile) -> Option<SwitchFlowSeries> {
    let path = file.sibling(FLOW_STEM, ".json");
    if !path.exists() {
        debug!(path = %path.display(), "switch flow stats missing");
        return None;
    }

    match load_flow_file(&path) {
        Ok(stats) => {
            let series = SwitchFlowSeries::first_of(stats);
            if series.is_none() {
                debug!(path = %path.display(), "switch flow stats empty");
            }
            series
        }
        Err(e) => {
            warn!(path = %path.display(), error = %format!("{e:#}"), "ignoring switch flow stats");
            None
        }
    }
}
