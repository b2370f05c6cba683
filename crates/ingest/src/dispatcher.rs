//! Deduplicate scanned bundles and hand the new ones to the upload pool.

use crate::cancel::CancellationToken;
use crate::config::CancelMode;
use crate::loader::{warn_if_undated, BundleLoader};
use crate::pool::{PoolSettings, UploadPool};
use crate::report::{ItemOutcome, ItemStatus, RunReport};
use crate::sink::Sink;
use resultsync_bundle_schema::{identifier_for_result, IdentifierSnapshot};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives one run from scanned paths to a [`RunReport`].
pub struct Dispatcher {
    sink: Arc<dyn Sink>,
    loader: BundleLoader,
    settings: PoolSettings,
    token: CancellationToken,
    cancel_mode: CancelMode,
    dry_run: bool,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn Sink>, settings: PoolSettings) -> Self {
        Self {
            sink,
            loader: BundleLoader::new(),
            settings,
            token: CancellationToken::new(),
            cancel_mode: CancelMode::Graceful,
            dry_run: false,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken, mode: CancelMode) -> Self {
        self.token = token;
        self.cancel_mode = mode;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Process `paths` in order against the start-of-run `snapshot`.
    ///
    /// Bundles already in the snapshot are skipped before any file is read.
    /// New bundles are queued by path and loaded by the pool workers. Load
    /// failures and upload failures are recorded and never stop the loop.
    /// Returns once every submitted upload has finished.
    pub async fn run(&self, paths: &[PathBuf], snapshot: &IdentifierSnapshot) -> RunReport {
        let mut report = RunReport::new(self.sink.describe(), self.settings.workers, self.dry_run);
        report.scanned = paths.len();

        let mut pool = (!self.dry_run).then(|| {
            UploadPool::start(
                Arc::clone(&self.sink),
                self.loader.clone(),
                self.settings.clone(),
                self.token.clone(),
            )
        });
        if let Some(pool) = &pool {
            report.workers = pool.worker_count();
        }

        for (index, path) in paths.iter().enumerate() {
            if self.token.is_cancelled() {
                report.unvisited = paths.len() - index;
                warn!(
                    remaining = report.unvisited,
                    "Run cancelled, no further bundles will be submitted"
                );
                break;
            }

            let identifier = identifier_for_result(path).unwrap_or_default();
            if snapshot.contains(&identifier) {
                debug!(identifier = %identifier, "Already ingested, skipping");
                report.skipped_existing += 1;
                continue;
            }

            match pool.as_mut() {
                Some(pool) => {
                    debug!(identifier = %identifier, "Queued for upload");
                    pool.submit(identifier, path.clone());
                }
                None => self.dry_run_one(&mut report, identifier, path).await,
            }
        }

        if let Some(pool) = pool {
            let results = pool.join(&self.token, self.cancel_mode).await;
            report.invalid_dates += results.invalid_dates;
            for outcome in results.outcomes {
                report.record(outcome);
            }
        }

        report.finish();
        report
    }

    /// Load one bundle and record what would have been uploaded.
    async fn dry_run_one(&self, report: &mut RunReport, identifier: String, path: &Path) {
        let dir = path.parent().unwrap_or(path);
        let status = match self.loader.load_blocking(path.to_path_buf()).await {
            Ok(bundle) => {
                if warn_if_undated(&bundle) {
                    report.invalid_dates += 1;
                }
                info!(identifier = %identifier, "Dry run, would upload");
                ItemStatus::WouldUpload
            }
            Err(reason) => {
                warn!(identifier = %identifier, "Skipping {}: {}", dir.display(), reason);
                ItemStatus::Skipped { reason }
            }
        };
        report.record(ItemOutcome::new(identifier, dir, status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::sink::{LocalSink, SinkError};
    use assert_fs::prelude::*;
    use assert_fs::TempDir;
    use async_trait::async_trait;
    use resultsync_bundle_schema::UploadReport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn write_bundle(root: &TempDir, name: &str) -> PathBuf {
        let dir = root.child("21-05-23_153000").child(name);
        dir.create_dir_all().unwrap();
        dir.child("testResults.json").write_str("{}").unwrap();
        dir.child("dump.pcap").write_binary(b"pcap").unwrap();
        dir.child("keyfile.log").write_str("keys").unwrap();
        dir.child("testResults.json").path().to_path_buf()
    }

    fn settings(workers: usize) -> PoolSettings {
        PoolSettings {
            workers,
            retry: RetryPolicy::none(),
            upload_timeout: Duration::from_secs(5),
        }
    }

    struct FailingSink;

    #[async_trait]
    impl Sink for FailingSink {
        fn describe(&self) -> String {
            "failing".into()
        }

        async fn list_identifiers(&self) -> Result<IdentifierSnapshot, SinkError> {
            Ok(IdentifierSnapshot::new())
        }

        async fn upload(&self, _report: &UploadReport) -> Result<(), SinkError> {
            Err(SinkError::Rejected {
                status: 422,
                body: "schema mismatch".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_known_identifiers_are_not_loaded() {
        let root = TempDir::new().unwrap();
        let a = write_bundle(&root, "a_client000001");
        let b = write_bundle(&root, "b_client000002");
        let c = write_bundle(&root, "c_client000003");
        // Loading A or B would now be a structural skip.
        std::fs::remove_file(a.parent().unwrap().join("dump.pcap")).unwrap();
        std::fs::write(&b, "{ broken").unwrap();

        let sink = Arc::new(LocalSink::open_in_memory().unwrap());
        let snapshot: IdentifierSnapshot = ["a_client000001", "b_client000002"]
            .into_iter()
            .collect();

        let report = Dispatcher::new(sink.clone(), settings(2))
            .run(&[a, b, c], &snapshot)
            .await;

        assert_eq!(report.scanned, 3);
        assert_eq!(report.skipped_existing, 2);
        assert_eq!(report.skipped_error(), 0);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].identifier, "c_client000003");
        assert_eq!(sink.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_capture_is_skipped_and_run_continues() {
        let root = TempDir::new().unwrap();
        let broken = write_bundle(&root, "a_server000001");
        let fine = write_bundle(&root, "b_server000002");
        std::fs::remove_file(broken.parent().unwrap().join("dump.pcap")).unwrap();

        let sink = Arc::new(LocalSink::open_in_memory().unwrap());
        let report = Dispatcher::new(sink.clone(), settings(1))
            .run(&[broken, fine], &IdentifierSnapshot::new())
            .await;

        assert_eq!(report.skipped_missing_files, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(sink.count().unwrap(), 1);
        assert!(sink.report("a_server000001").unwrap().is_none());
    }

    /// Removes the captures of later bundles while the first upload runs.
    struct PruningSink {
        later: Vec<PathBuf>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Sink for PruningSink {
        fn describe(&self) -> String {
            "pruning".into()
        }

        async fn list_identifiers(&self) -> Result<IdentifierSnapshot, SinkError> {
            Ok(IdentifierSnapshot::new())
        }

        async fn upload(&self, _report: &UploadReport) -> Result<(), SinkError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                for path in &self.later {
                    std::fs::remove_file(path.parent().unwrap().join("dump.pcap")).unwrap();
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_bundles_are_read_only_when_a_worker_takes_them() {
        let root = TempDir::new().unwrap();
        let paths: Vec<_> = (0..5)
            .map(|n| write_bundle(&root, &format!("lazy_client{:06}", n)))
            .collect();

        let sink = Arc::new(PruningSink {
            later: paths[1..].to_vec(),
            calls: AtomicUsize::new(0),
        });
        let report = Dispatcher::new(sink.clone(), settings(1))
            .run(&paths, &IdentifierSnapshot::new())
            .await;

        // Only the bundle being uploaded had been read when the rest lost
        // their captures.
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.skipped_missing_files, 4);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.items[0].identifier, "lazy_client000000");
    }

    #[tokio::test]
    async fn test_barrier_resolves_when_every_upload_fails() {
        let root = TempDir::new().unwrap();
        let paths: Vec<_> = (0..6)
            .map(|n| write_bundle(&root, &format!("f_client{:06}", n)))
            .collect();

        let report = Dispatcher::new(Arc::new(FailingSink), settings(3))
            .run(&paths, &IdentifierSnapshot::new())
            .await;

        assert_eq!(report.failed, 6);
        assert_eq!(report.succeeded, 0);
        assert!(report.has_failures());
        assert!(report.finished_at.is_some());
        assert!(report.items.iter().all(|i| matches!(
            &i.status,
            ItemStatus::Failed { transient: false, error, .. } if error.contains("422")
        )));
    }

    #[tokio::test]
    async fn test_same_identifier_twice_is_attempted_twice() {
        let root = TempDir::new().unwrap();
        let first = write_bundle(&root, "dup_client000001");
        let other_run = root.child("22-05-23_080000").child("dup_client000001");
        other_run.create_dir_all().unwrap();
        for file in ["testResults.json", "dump.pcap", "keyfile.log"] {
            std::fs::copy(first.parent().unwrap().join(file), other_run.path().join(file))
                .unwrap();
        }
        let second = other_run.child("testResults.json").path().to_path_buf();

        let sink = Arc::new(LocalSink::open_in_memory().unwrap());
        let report = Dispatcher::new(sink.clone(), settings(1))
            .run(&[first, second], &IdentifierSnapshot::new())
            .await;

        // The sink enforces uniqueness; the pipeline itself attempts both.
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(sink.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_uploads_nothing() {
        let root = TempDir::new().unwrap();
        let path = write_bundle(&root, "dry_client000001");

        let sink = Arc::new(LocalSink::open_in_memory().unwrap());
        let report = Dispatcher::new(sink.clone(), settings(2))
            .dry_run(true)
            .run(&[path], &IdentifierSnapshot::new())
            .await;

        assert_eq!(report.would_upload, 1);
        assert_eq!(report.succeeded, 0);
        assert_eq!(sink.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_submits_nothing() {
        let root = TempDir::new().unwrap();
        let paths: Vec<_> = (0..3)
            .map(|n| write_bundle(&root, &format!("x_client{:06}", n)))
            .collect();

        let token = CancellationToken::new();
        token.cancel();
        let sink = Arc::new(LocalSink::open_in_memory().unwrap());
        let report = Dispatcher::new(sink.clone(), settings(2))
            .with_cancellation(token, CancelMode::Graceful)
            .run(&paths, &IdentifierSnapshot::new())
            .await;

        assert_eq!(report.unvisited, 3);
        assert_eq!(report.succeeded, 0);
        assert_eq!(sink.count().unwrap(), 0);
    }
}
