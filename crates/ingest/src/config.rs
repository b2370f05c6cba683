//! Ingest configuration.

use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use regex::Regex;
use resultsync_common::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default remote API root.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api/v1";
/// Largest upload body the remote sink will send.
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 500_000_000;
/// Filename pattern of harness result documents.
pub const DEFAULT_RESULT_FILE_PATTERN: &str = r"testResults\.json$";

/// Which sink receives the bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkMode {
    /// Embedded SQLite datastore.
    Local,
    /// Remote report analyzer over HTTP.
    Remote,
}

impl fmt::Display for SinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkMode::Local => write!(f, "local"),
            SinkMode::Remote => write!(f, "remote"),
        }
    }
}

impl FromStr for SinkMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "db" => Ok(SinkMode::Local),
            "remote" | "http" => Ok(SinkMode::Remote),
            _ => Err(anyhow::anyhow!("Invalid sink mode: {}", s)),
        }
    }
}

/// What happens to in-flight uploads when a run is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelMode {
    /// Stop submitting, let running uploads finish.
    Graceful,
    /// Stop submitting and abort running uploads.
    Forced,
}

impl FromStr for CancelMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "graceful" | "drain" => Ok(CancelMode::Graceful),
            "forced" | "abort" => Ok(CancelMode::Forced),
            _ => Err(anyhow::anyhow!("Invalid cancel mode: {}", s)),
        }
    }
}

/// Full configuration of one ingest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub mode: SinkMode,
    /// SQLite file used in local mode.
    pub database_path: PathBuf,
    /// API root used in remote mode.
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Worker count; defaults depend on the mode.
    pub concurrency: Option<usize>,
    pub upload_timeout_secs: u64,
    pub max_payload_bytes: u64,
    pub retry: RetryPolicy,
    pub cancel_mode: CancelMode,
    pub result_file_pattern: String,
    /// Scan, dedup and load, but never upload.
    pub dry_run: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mode: SinkMode::Local,
            database_path: PathBuf::from("resultsync.db"),
            base_url: DEFAULT_BASE_URL.to_string(),
            username: None,
            password: None,
            concurrency: None,
            upload_timeout_secs: 300,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            retry: RetryPolicy::default(),
            cancel_mode: CancelMode::Graceful,
            result_file_pattern: DEFAULT_RESULT_FILE_PATTERN.to_string(),
            dry_run: false,
        }
    }
}

impl IngestConfig {
    /// Load a YAML configuration file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: IngestConfig =
            serde_yaml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Number of upload workers.
    ///
    /// Remote delivery stays serialized unless asked otherwise, local
    /// delivery uses one worker per available core.
    pub fn worker_count(&self) -> usize {
        let default = match self.mode {
            SinkMode::Local => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            SinkMode::Remote => 1,
        };
        self.concurrency.unwrap_or(default).max(1)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn result_file_regex(&self) -> Result<Regex, Error> {
        Regex::new(&self.result_file_pattern).map_err(|e| {
            Error::Config(format!(
                "invalid result file pattern {:?}: {}",
                self.result_file_pattern, e
            ))
        })
    }

    /// Reject settings that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<(), Error> {
        if self.concurrency == Some(0) {
            return Err(Error::Config("concurrency must be at least 1".into()));
        }
        if self.upload_timeout_secs == 0 {
            return Err(Error::Config("upload timeout must be at least 1s".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry attempts must be at least 1".into()));
        }
        if self.mode == SinkMode::Remote && self.base_url.trim().is_empty() {
            return Err(Error::Config("remote mode requires a base url".into()));
        }
        self.result_file_regex()?;
        Ok(())
    }
}
