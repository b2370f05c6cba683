//! Fixed-size upload worker pool.
//!
//! The queue holds result document paths, not loaded bundles. Each worker
//! takes one path, loads the bundle, delivers it to completion and drops it
//! before taking the next, so no more than `workers` bundles are in memory
//! and no more than `workers` uploads are in flight. Submitting never
//! blocks. The pool belongs to a single run: [`UploadPool::join`] is the
//! completion barrier, and dropping a pool that was not joined aborts its
//! workers.

use crate::cancel::CancellationToken;
use crate::config::{CancelMode, IngestConfig};
use crate::loader::{warn_if_undated, BundleLoader};
use crate::report::{ItemOutcome, ItemStatus};
use crate::retry::{upload_with_retry, RetryPolicy};
use crate::sink::Sink;
use resultsync_bundle_schema::Bundle;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Worker count and delivery settings.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub workers: usize,
    pub retry: RetryPolicy,
    pub upload_timeout: Duration,
}

impl PoolSettings {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            workers: config.worker_count(),
            retry: config.retry,
            upload_timeout: config.upload_timeout(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            retry: RetryPolicy::default(),
            upload_timeout: Duration::from_secs(300),
        }
    }
}

struct Job {
    seq: usize,
    identifier: String,
    result_path: PathBuf,
}

struct Finished {
    seq: usize,
    outcome: ItemOutcome,
    undated: bool,
}

type Outcomes = Arc<Mutex<Vec<Finished>>>;

/// Everything the pool learned about its submissions.
#[derive(Debug, Default)]
pub struct PoolResults {
    /// One outcome per submission, in submission order.
    pub outcomes: Vec<ItemOutcome>,
    /// Loaded bundles whose run directory is not a date.
    pub invalid_dates: usize,
}

/// Pool of upload workers owned by one run.
pub struct UploadPool {
    sender: Option<UnboundedSender<Job>>,
    workers: Vec<JoinHandle<()>>,
    outcomes: Outcomes,
    submitted: Vec<(String, PathBuf)>,
}

impl UploadPool {
    /// Spawn `settings.workers` workers loading with `loader` and delivering
    /// to `sink`.
    pub fn start(
        sink: Arc<dyn Sink>,
        loader: BundleLoader,
        settings: PoolSettings,
        token: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = Arc::new(tokio::sync::Mutex::new(receiver));
        let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));

        let workers = (0..settings.workers.max(1))
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    Arc::clone(&queue),
                    Arc::clone(&sink),
                    loader.clone(),
                    settings.clone(),
                    token.clone(),
                    Arc::clone(&outcomes),
                ))
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
            outcomes,
            submitted: Vec::new(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue the bundle at `result_path` without waiting for a free worker.
    /// Nothing is read until a worker picks it up.
    pub fn submit(&mut self, identifier: String, result_path: PathBuf) {
        let seq = self.submitted.len();
        self.submitted
            .push((identifier.clone(), bundle_dir(&result_path)));

        let Some(sender) = &self.sender else {
            return;
        };
        let job = Job {
            seq,
            identifier,
            result_path,
        };
        if sender.send(job).is_err() {
            // Every worker is gone; join() reports the bundle as cancelled.
            error!("Upload workers stopped, bundle not queued");
        }
    }

    /// Wait for every submitted bundle, then return their outcomes in
    /// submission order.
    ///
    /// With [`CancelMode::Forced`], cancellation of `token` aborts workers
    /// that are still running; their unfinished bundles are reported as
    /// cancelled. Always resolves, whatever the individual outcomes.
    pub async fn join(mut self, token: &CancellationToken, mode: CancelMode) -> PoolResults {
        drop(self.sender.take());

        let mut workers = std::mem::take(&mut self.workers);
        let aborts: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();
        let drained = wait_all(&mut workers);
        tokio::pin!(drained);

        match mode {
            CancelMode::Graceful => drained.await,
            CancelMode::Forced => {
                tokio::select! {
                    _ = &mut drained => {}
                    _ = token.cancelled() => {
                        info!("Aborting {} upload workers", aborts.len());
                        for handle in &aborts {
                            handle.abort();
                        }
                        (&mut drained).await;
                    }
                }
            }
        }

        let mut finished = match self.outcomes.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        finished.sort_by_key(|f| f.seq);

        let mut results = PoolResults {
            outcomes: Vec::with_capacity(self.submitted.len()),
            invalid_dates: finished.iter().filter(|f| f.undated).count(),
        };
        let mut finished = finished.into_iter().peekable();
        for (seq, (identifier, dir)) in self.submitted.drain(..).enumerate() {
            match finished.next_if(|f| f.seq == seq) {
                Some(f) => results.outcomes.push(f.outcome),
                None => results
                    .outcomes
                    .push(ItemOutcome::new(identifier, &dir, ItemStatus::Cancelled)),
            }
        }
        results
    }
}

impl Drop for UploadPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

fn bundle_dir(result_path: &Path) -> PathBuf {
    result_path
        .parent()
        .unwrap_or(result_path)
        .to_path_buf()
}

async fn wait_all(workers: &mut [JoinHandle<()>]) {
    for worker in workers.iter_mut() {
        if let Err(e) = worker.await {
            if e.is_panic() {
                error!("Upload worker panicked: {}", e);
            }
        }
    }
}

async fn worker(
    id: usize,
    queue: Arc<tokio::sync::Mutex<UnboundedReceiver<Job>>>,
    sink: Arc<dyn Sink>,
    loader: BundleLoader,
    settings: PoolSettings,
    token: CancellationToken,
    outcomes: Outcomes,
) {
    loop {
        let job = {
            let mut receiver = queue.lock().await;
            receiver.recv().await
        };
        let Some(Job {
            seq,
            identifier,
            result_path,
        }) = job
        else {
            break;
        };

        let dir = bundle_dir(&result_path);
        let mut undated = false;
        let status = if token.is_cancelled() {
            debug!(worker = id, identifier = %identifier, "Run cancelled, not uploading");
            ItemStatus::Cancelled
        } else {
            info!(worker = id, identifier = %identifier, "Loading bundle");
            match loader.load_blocking(result_path).await {
                Ok(bundle) => {
                    undated = warn_if_undated(&bundle);
                    deliver(id, sink.as_ref(), &bundle, &settings).await
                }
                Err(reason) => {
                    warn!(identifier = %identifier, "Skipping {}: {}", dir.display(), reason);
                    ItemStatus::Skipped { reason }
                }
            }
        };

        let outcome = ItemOutcome::new(identifier, &dir, status);
        if let Ok(mut guard) = outcomes.lock() {
            guard.push(Finished {
                seq,
                outcome,
                undated,
            });
        }
    }
    debug!(worker = id, "Upload worker finished");
}

async fn deliver(id: usize, sink: &dyn Sink, bundle: &Bundle, settings: &PoolSettings) -> ItemStatus {
    let identifier = bundle.identifier();
    debug!(
        worker = id,
        identifier,
        bytes = bundle.approx_size(),
        "Starting upload"
    );

    let delivery =
        upload_with_retry(sink, &bundle.upload, &settings.retry, settings.upload_timeout).await;

    match delivery.result {
        Ok(()) => {
            info!(identifier, attempts = delivery.attempts, "Uploaded {}", identifier);
            ItemStatus::Uploaded {
                attempts: delivery.attempts,
            }
        }
        Err(e) => {
            error!(identifier, attempts = delivery.attempts, "Upload failed {}: {}", identifier, e);
            ItemStatus::Failed {
                attempts: delivery.attempts,
                error: e.to_string(),
                transient: e.is_transient(),
            }
        }
    }
}
