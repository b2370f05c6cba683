//! Common error types for resultsync.

use std::path::PathBuf;
use thiserror::Error;

/// Common error type for resultsync operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cannot open scan root {path}: {reason}")]
    ScanRoot { path: PathBuf, reason: String },

    #[error("Failed to fetch ingested identifiers from {sink} sink: {reason}")]
    Snapshot { sink: String, reason: String },

    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias using common Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}
