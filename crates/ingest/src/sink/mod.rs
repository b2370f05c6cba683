//! Destinations for ingested bundles.

mod local;
mod remote;

pub use local::LocalSink;
pub use remote::RemoteSink;

use crate::config::{IngestConfig, SinkMode};
use anyhow::{Context, Result};
use async_trait::async_trait;
use resultsync_bundle_schema::{IdentifierSnapshot, UploadReport};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("upload timed out after {0:?}")]
    Timeout(Duration),

    #[error("sink unavailable (HTTP {status}): {body}")]
    Unavailable { status: u16, body: String },

    #[error("upload rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("bundle {0} is already ingested")]
    Duplicate(String),

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("storage busy: {0}")]
    Busy(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl SinkError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SinkError::Transport(_)
                | SinkError::Timeout(_)
                | SinkError::Unavailable { .. }
                | SinkError::Busy(_)
        )
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            408 | 429 | 500..=599 => SinkError::Unavailable { status, body },
            409 => SinkError::Duplicate(body),
            _ => SinkError::Rejected { status, body },
        }
    }
}

/// A place bundles are delivered to.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Human readable location, used in logs and reports.
    fn describe(&self) -> String;

    /// Identifiers of every bundle already stored.
    async fn list_identifiers(&self) -> Result<IdentifierSnapshot, SinkError>;

    /// Store one bundle.
    async fn upload(&self, report: &UploadReport) -> Result<(), SinkError>;
}

/// Open the sink selected by the configuration.
pub fn open_sink(config: &IngestConfig) -> Result<Arc<dyn Sink>> {
    let sink: Arc<dyn Sink> = match config.mode {
        SinkMode::Local => Arc::new(
            LocalSink::open(&config.database_path).with_context(|| {
                format!("Failed to open database {}", config.database_path.display())
            })?,
        ),
        SinkMode::Remote => Arc::new(
            RemoteSink::new(
                &config.base_url,
                config.username.clone(),
                config.password.clone(),
                config.max_payload_bytes,
            )
            .context("Failed to create HTTP client")?,
        ),
    };
    Ok(sink)
}
