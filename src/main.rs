use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use cmdtrace::config::{Config, Overrides};
use cmdtrace::dataset::Store;
use cmdtrace::join::NetdataClient;
use cmdtrace::lifecycle::{AnomalyHandler, ForceMode, InteractivePrompt};
use cmdtrace::pipeline::{Pass, Pipeline, PipelineError};

/// Reconstructs request lifecycles from command logs and builds the
/// training dataset.
#[derive(Parser)]
#[command(name = "cmdtrace", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Directory holding the command logs.
    #[arg(long)]
    source: Option<PathBuf>,

    /// Process these log files instead of scanning the source directory.
    #[arg(short = 'f', long, num_args = 1..)]
    files: Vec<PathBuf>,

    /// Directory receiving run-wide outputs and the default database.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Query the metrics service for CPU usage.
    #[arg(long)]
    netdata: bool,

    /// Skip rate and switch-flow enrichment.
    #[arg(long)]
    no_enrich: bool,

    /// Log and drop anomalies instead of asking.
    #[arg(long)]
    force: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Convert raw logs into converted logs, rate statistics and reports.
    Convert,
    /// Load converted logs into the training store.
    Ingest,
    /// Convert and load raw logs in one pass (default).
    Run,
    /// Export model features from the training store.
    Features,
    /// Print version information and exit.
    Version,
}

/// Build-time version info.
mod version {
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

/// Exit status when at least one file failed.
const EXIT_FILE_FAILURES: u8 = 1;
/// Exit status after an operator abort.
const EXIT_ABORTED: u8 = 2;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Run);

    if let Command::Version = command {
        println!("cmdtrace {}", version::full());
        return Ok(ExitCode::SUCCESS);
    }

    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    cfg.apply(&Overrides {
        source: cli.source.clone(),
        files: cli.files.clone(),
        output: cli.output.clone(),
        netdata: cli.netdata,
        no_enrich: cli.no_enrich,
        force: cli.force,
    });
    cfg.validate().context("validating configuration")?;

    let log_level = cli.log_level.as_deref().unwrap_or(cfg.log_level.as_str());
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("invalid log level: {log_level}"))?;
    fmt().with_env_filter(filter).with_target(true).init();

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        source = %cfg.source.directory.display(),
        output = %cfg.output_directory.display(),
        "starting cmdtrace",
    );

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(run(cfg, command))
}

async fn run(cfg: Config, command: Command) -> Result<ExitCode> {
    let store = Store::open(&cfg).await.context("opening training store")?;
    tracing::info!(backend = store.name(), "training store ready");

    let cpu_source = if cfg.metrics_service.enabled {
        Some(
            NetdataClient::new(&cfg.metrics_service, cfg.time.offset()?)
                .context("creating metrics service client")?,
        )
    } else {
        None
    };

    let handler: Box<dyn AnomalyHandler> = if cfg.anomalies.force {
        Box::new(ForceMode)
    } else {
        Box::new(InteractivePrompt::new(
            std::io::stdin().lock(),
            std::io::stderr(),
        ))
    };

    let mut pipeline = Pipeline::new(cfg, store, cpu_source, handler)?;

    let pass = match command {
        Command::Convert => Some(Pass::Convert),
        Command::Ingest => Some(Pass::Ingest),
        Command::Run => Some(Pass::Run),
        Command::Features | Command::Version => None,
    };

    match pass {
        Some(pass) => match pipeline.execute(pass).await {
            Ok(_) => {}
            Err(e) if e.downcast_ref::<PipelineError>().is_some() => {
                tracing::error!(error = %e, "run aborted");
                return Ok(ExitCode::from(EXIT_ABORTED));
            }
            Err(e) => return Err(e),
        },
        None => {
            pipeline.export_features().await?;
        }
    }

    let summary = pipeline.finish()?;
    if summary.has_failures() {
        return Ok(ExitCode::from(EXIT_FILE_FAILURES));
    }
    Ok(ExitCode::SUCCESS)
}
