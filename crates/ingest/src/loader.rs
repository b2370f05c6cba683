//! Load a bundle from its result document path.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use resultsync_bundle_schema::{Bundle, KEYLOG_FILE, PCAP_FILE};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a candidate bundle was not loaded.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    #[error("files missing: {}", .missing.join(", "))]
    MissingFiles { missing: Vec<String> },

    #[error("cannot read {file}: {message}")]
    Unreadable { file: String, message: String },

    #[error("malformed result document: {message}")]
    ParseError { message: String },

    #[error("invalid bundle location: {message}")]
    InvalidLocation { message: String },
}

/// Reads the three bundle files and assembles a [`Bundle`].
#[derive(Debug, Clone)]
pub struct BundleLoader {
    pcap_file: String,
    keylog_file: String,
}

impl Default for BundleLoader {
    fn default() -> Self {
        Self {
            pcap_file: PCAP_FILE.to_string(),
            keylog_file: KEYLOG_FILE.to_string(),
        }
    }
}

impl BundleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the bundle whose result document is `result_path`.
    ///
    /// The capture and key log must sit next to the result document.
    pub fn load(&self, result_path: &Path) -> Result<Bundle, SkipReason> {
        let dir = result_path
            .parent()
            .ok_or_else(|| SkipReason::InvalidLocation {
                message: format!("{} has no parent directory", result_path.display()),
            })?;
        let pcap_path = dir.join(&self.pcap_file);
        let keylog_path = dir.join(&self.keylog_file);

        let missing: Vec<String> = [result_path, pcap_path.as_path(), keylog_path.as_path()]
            .iter()
            .filter(|p| !p.is_file())
            .map(|p| file_label(p))
            .collect();
        if !missing.is_empty() {
            return Err(SkipReason::MissingFiles { missing });
        }

        let pcap_dump = read_base64(&pcap_path)?;
        let keylog = read_base64(&keylog_path)?;

        let start = Instant::now();
        let raw = std::fs::read(result_path).map_err(|e| SkipReason::Unreadable {
            file: file_label(result_path),
            message: e.to_string(),
        })?;
        let document = match serde_json::from_slice::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(SkipReason::ParseError {
                    message: "top level is not an object".to_string(),
                })
            }
            Err(e) => {
                return Err(SkipReason::ParseError {
                    message: e.to_string(),
                })
            }
        };
        debug!(
            path = %result_path.display(),
            bytes = raw.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Parsed result document"
        );

        Bundle::new(dir.to_path_buf(), document, pcap_dump, keylog).map_err(|e| {
            SkipReason::InvalidLocation {
                message: e.to_string(),
            }
        })
    }

    /// [`load`](Self::load) on the blocking thread pool.
    pub async fn load_blocking(&self, result_path: PathBuf) -> Result<Bundle, SkipReason> {
        let loader = self.clone();
        let label = file_label(&result_path);
        tokio::task::spawn_blocking(move || loader.load(&result_path))
            .await
            .map_err(|e| SkipReason::Unreadable {
                file: label,
                message: format!("loader task failed: {}", e),
            })?
    }
}

/// Warn about a bundle whose run directory is not a date; true if so.
pub(crate) fn warn_if_undated(bundle: &Bundle) -> bool {
    if bundle.metadata.date.is_valid() {
        return false;
    }
    warn!(
        identifier = bundle.identifier(),
        "Run directory of {} is not a DD-MM-YY_HHmmss date, storing without date",
        bundle.dir.display()
    );
    true
}

fn read_base64(path: &Path) -> Result<String, SkipReason> {
    let bytes = std::fs::read(path).map_err(|e| SkipReason::Unreadable {
        file: file_label(path),
        message: e.to_string(),
    })?;
    Ok(STANDARD.encode(bytes))
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
