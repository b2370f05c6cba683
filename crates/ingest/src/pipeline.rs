//! End-to-end ingest run: scan, snapshot, dispatch.

use crate::cancel::CancellationToken;
use crate::config::IngestConfig;
use crate::dispatcher::Dispatcher;
use crate::pool::PoolSettings;
use crate::report::RunReport;
use crate::scanner::Scanner;
use crate::sink::{open_sink, Sink};
use anyhow::Result;
use resultsync_bundle_schema::IdentifierSnapshot;
use resultsync_common::Error;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Identifiers already stored in `sink`, fetched once per run.
///
/// Any failure is fatal: deduplicating against a partial view would
/// re-ingest bundles.
pub async fn known_identifiers(sink: &dyn Sink) -> Result<IdentifierSnapshot, Error> {
    sink.list_identifiers()
        .await
        .map_err(|e| Error::Snapshot {
            sink: sink.describe(),
            reason: e.to_string(),
        })
}

/// A configured ingest pipeline bound to one sink.
pub struct Pipeline {
    config: IngestConfig,
    sink: Arc<dyn Sink>,
    token: CancellationToken,
}

impl Pipeline {
    /// Validate the configuration and open the configured sink.
    pub fn new(config: IngestConfig) -> Result<Self> {
        config.validate()?;
        let sink = open_sink(&config)?;
        Ok(Self::with_sink(config, sink))
    }

    /// Pipeline delivering to an already opened sink.
    pub fn with_sink(config: IngestConfig, sink: Arc<dyn Sink>) -> Self {
        Self {
            config,
            sink,
            token: CancellationToken::new(),
        }
    }

    /// Token that cancels runs of this pipeline.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Ingest every new bundle below `root`.
    ///
    /// Fails only when the root cannot be scanned or the sink cannot list
    /// its identifiers; per-bundle problems end up in the report.
    pub async fn run(&self, root: &Path) -> Result<RunReport> {
        info!("Scanning {}", root.display());
        let scanner = Scanner::new(self.config.result_file_regex()?);
        let scan = scanner.scan(root)?;
        info!(
            found = scan.paths.len(),
            unreadable_dirs = scan.unreadable_dirs,
            "Scan complete"
        );

        let snapshot = known_identifiers(self.sink.as_ref()).await?;
        info!(
            known = snapshot.len(),
            "Fetched ingested identifiers from {}",
            self.sink.describe()
        );

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.sink),
            PoolSettings::from_config(&self.config),
        )
        .with_cancellation(self.token.clone(), self.config.cancel_mode)
        .dry_run(self.config.dry_run);

        let mut report = dispatcher.run(&scan.paths, &snapshot).await;
        report.unreadable_dirs = scan.unreadable_dirs;

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            skipped_existing = report.skipped_existing,
            skipped_error = report.skipped_error(),
            "Run finished"
        );
        Ok(report)
    }
}
