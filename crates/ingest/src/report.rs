//! Aggregate outcome of an ingest run.

use crate::loader::SkipReason;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// What happened to one bundle that got past deduplication.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemStatus {
    Uploaded { attempts: u32 },
    Failed {
        attempts: u32,
        error: String,
        transient: bool,
    },
    Skipped { reason: SkipReason },
    /// Submitted or queued, but not delivered because the run was cancelled.
    Cancelled,
    /// Loaded during a dry run.
    WouldUpload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemOutcome {
    pub identifier: String,
    pub dir: PathBuf,
    #[serde(flatten)]
    pub status: ItemStatus,
}

impl ItemOutcome {
    pub fn new(identifier: impl Into<String>, dir: &Path, status: ItemStatus) -> Self {
        Self {
            identifier: identifier.into(),
            dir: dir.to_path_buf(),
            status,
        }
    }
}

/// Counts and per-item outcomes of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub sink: String,
    pub workers: usize,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    pub scanned: usize,
    pub unreadable_dirs: usize,
    pub skipped_existing: usize,
    pub skipped_missing_files: usize,
    pub skipped_parse_error: usize,
    pub skipped_unreadable: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub would_upload: usize,
    /// Paths never looked at because the run was cancelled.
    pub unvisited: usize,
    /// Loaded bundles whose run directory name did not parse as a date.
    pub invalid_dates: usize,

    pub items: Vec<ItemOutcome>,
}

impl RunReport {
    pub fn new(sink: impl Into<String>, workers: usize, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            sink: sink.into(),
            workers,
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            scanned: 0,
            unreadable_dirs: 0,
            skipped_existing: 0,
            skipped_missing_files: 0,
            skipped_parse_error: 0,
            skipped_unreadable: 0,
            succeeded: 0,
            failed: 0,
            cancelled: 0,
            would_upload: 0,
            unvisited: 0,
            invalid_dates: 0,
            items: Vec::new(),
        }
    }

    /// Record one item outcome and bump the matching counter.
    pub fn record(&mut self, outcome: ItemOutcome) {
        match &outcome.status {
            ItemStatus::Uploaded { .. } => self.succeeded += 1,
            ItemStatus::Failed { .. } => self.failed += 1,
            ItemStatus::Cancelled => self.cancelled += 1,
            ItemStatus::WouldUpload => self.would_upload += 1,
            ItemStatus::Skipped { reason } => match reason {
                SkipReason::MissingFiles { .. } => self.skipped_missing_files += 1,
                SkipReason::ParseError { .. } => self.skipped_parse_error += 1,
                SkipReason::Unreadable { .. } | SkipReason::InvalidLocation { .. } => {
                    self.skipped_unreadable += 1
                }
            },
        }
        self.items.push(outcome);
    }

    /// Bundles skipped because they could not be loaded.
    pub fn skipped_error(&self) -> usize {
        self.skipped_missing_files + self.skipped_parse_error + self.skipped_unreadable
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_seconds(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Outcomes of failed uploads.
    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items
            .iter()
            .filter(|i| matches!(i.status, ItemStatus::Failed { .. }))
    }

    /// Human readable summary.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str("=== Ingest Summary ===\n");
        out.push_str(&format!("Run:              {}\n", self.run_id));
        out.push_str(&format!(
            "Sink:             {} ({} workers{})\n",
            self.sink,
            self.workers,
            if self.dry_run { ", dry run" } else { "" }
        ));
        out.push_str(&format!("Scanned:          {}\n", self.scanned));
        out.push_str(&format!("Already ingested: {}\n", self.skipped_existing));
        out.push_str(&format!(
            "Skipped:          {} (missing files {}, parse errors {}, unreadable {})\n",
            self.skipped_error(),
            self.skipped_missing_files,
            self.skipped_parse_error,
            self.skipped_unreadable
        ));
        if self.dry_run {
            out.push_str(&format!("Would upload:     {}\n", self.would_upload));
        } else {
            out.push_str(&format!("Uploaded:         {}\n", self.succeeded));
            out.push_str(&format!("Failed:           {}\n", self.failed));
        }
        if self.cancelled > 0 || self.unvisited > 0 {
            out.push_str(&format!(
                "Cancelled:        {} (+{} not visited)\n",
                self.cancelled, self.unvisited
            ));
        }
        if self.invalid_dates > 0 {
            out.push_str(&format!("Invalid dates:    {}\n", self.invalid_dates));
        }
        if self.unreadable_dirs > 0 {
            out.push_str(&format!("Unreadable dirs:  {}\n", self.unreadable_dirs));
        }
        out.push_str(&format!("Duration:         {:.1}s\n", self.duration_seconds()));

        for failure in self.failures() {
            if let ItemStatus::Failed { error, .. } = &failure.status {
                out.push_str(&format!("  - {}: {}\n", failure.identifier, error));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts() {
        let mut report = RunReport::new("sqlite::memory:", 2, false);
        let dir = Path::new("run/x");

        report.record(ItemOutcome::new("a", dir, ItemStatus::Uploaded { attempts: 1 }));
        report.record(ItemOutcome::new(
            "b",
            dir,
            ItemStatus::Failed {
                attempts: 3,
                error: "request failed: connection refused".into(),
                transient: true,
            },
        ));
        report.record(ItemOutcome::new(
            "c",
            dir,
            ItemStatus::Skipped {
                reason: SkipReason::MissingFiles {
                    missing: vec!["dump.pcap".into()],
                },
            },
        ));
        report.record(ItemOutcome::new(
            "d",
            dir,
            ItemStatus::Skipped {
                reason: SkipReason::ParseError {
                    message: "EOF".into(),
                },
            },
        ));
        report.record(ItemOutcome::new("e", dir, ItemStatus::Cancelled));

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped_error(), 2);
        assert_eq!(report.cancelled, 1);
        assert!(report.has_failures());
        assert_eq!(report.failures().count(), 1);
        assert!(report.summary().contains("b: request failed"));
    }

    #[test]
    fn test_serializes_flat_items() {
        let mut report = RunReport::new("http://localhost:5000/api/v1", 1, false);
        report.record(ItemOutcome::new(
            "a_client000001",
            Path::new("run/a_client000001"),
            ItemStatus::Uploaded { attempts: 2 },
        ));
        report.finish();

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["items"][0]["status"], "uploaded");
        assert_eq!(value["items"][0]["attempts"], 2);
        assert_eq!(value["items"][0]["identifier"], "a_client000001");
        assert!(value["finished_at"].is_string());
    }
}
