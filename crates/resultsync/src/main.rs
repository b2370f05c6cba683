//! Resultsync - ingest TLS test harness result bundles into a report store.

use anyhow::Context;
use clap::Parser;
use resultsync_ingest::retry::RetryPolicy;
use resultsync_ingest::{CancelMode, IngestConfig, Pipeline, SinkMode};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit status when the run completed but some uploads failed.
const EXIT_PARTIAL_FAILURE: i32 = 2;

#[derive(Parser)]
#[command(name = "resultsync")]
#[command(
    author,
    version,
    about = "Upload new test result bundles to a local database or a remote analyzer"
)]
struct Cli {
    /// Root directory containing harness output
    root: PathBuf,

    /// YAML configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sink to deliver to (local, remote)
    #[arg(long)]
    mode: Option<String>,

    /// SQLite database file (local mode)
    #[arg(long)]
    database: Option<PathBuf>,

    /// API root of the remote analyzer (remote mode)
    #[arg(long)]
    base_url: Option<String>,

    /// Basic auth user for the remote analyzer
    #[arg(long)]
    user: Option<String>,

    /// Basic auth password for the remote analyzer
    #[arg(long)]
    password: Option<String>,

    /// Number of concurrent uploads
    #[arg(long, short = 'j')]
    concurrency: Option<usize>,

    /// Per-upload timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Upload attempts for transient failures, including the first
    #[arg(long)]
    retries: Option<u32>,

    /// Behaviour on Ctrl-C (graceful, forced)
    #[arg(long)]
    cancel_mode: Option<String>,

    /// Scan and load bundles without uploading them
    #[arg(long)]
    dry_run: bool,

    /// Write the run report as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Exit with status 2 when any upload failed
    #[arg(long)]
    fail_on_error: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, default_value = "text")]
    log_format: String,
}

impl Cli {
    fn ingest_config(&self) -> anyhow::Result<IngestConfig> {
        let mut config = match &self.config {
            Some(path) => IngestConfig::load(path)?,
            None => IngestConfig::default(),
        };

        if let Some(mode) = &self.mode {
            config.mode = mode.parse::<SinkMode>()?;
        }
        if let Some(database) = &self.database {
            config.database_path = database.clone();
        }
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if self.user.is_some() {
            config.username = self.user.clone();
        }
        if self.password.is_some() {
            config.password = self.password.clone();
        }
        if self.concurrency.is_some() {
            config.concurrency = self.concurrency;
        }
        if let Some(timeout) = self.timeout {
            config.upload_timeout_secs = timeout;
        }
        if let Some(retries) = self.retries {
            config.retry = RetryPolicy {
                max_attempts: retries,
                ..config.retry
            };
        }
        if let Some(cancel_mode) = &self.cancel_mode {
            config.cancel_mode = cancel_mode.parse::<CancelMode>()?;
        }
        config.dry_run |= self.dry_run;

        Ok(config)
    }
}

fn init_logging(verbose: bool, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        "json" => registry.with(fmt::layer().json()).init(),
        _ => registry.with(fmt::layer().with_target(false)).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, &cli.log_format);

    let root = std::fs::canonicalize(&cli.root)
        .with_context(|| format!("Cannot resolve root directory {}", cli.root.display()))?;
    let config = cli.ingest_config()?;
    info!(
        "Ingesting {} into {} sink ({} workers)",
        root.display(),
        config.mode,
        config.worker_count()
    );

    let pipeline = Pipeline::new(config)?;

    let token = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping");
            token.cancel();
        }
    });

    let report = pipeline.run(&root).await?;

    if let Some(path) = &cli.report {
        let report_json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, report_json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Report written to {:?}", path);
    }

    println!("\n{}", report.summary());

    if cli.fail_on_error && report.has_failures() {
        std::process::exit(EXIT_PARTIAL_FAILURE);
    }

    Ok(())
}
