//! In-memory bundle and its derived metadata.

use crate::naming::short_identifier;
use crate::upload::UploadReport;
use resultsync_common::{BundleDate, Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Result document written by the harness for every run.
pub const RESULT_FILE: &str = "testResults.json";
/// Packet capture recorded next to the result document.
pub const PCAP_FILE: &str = "dump.pcap";
/// TLS key log recorded next to the result document.
pub const KEYLOG_FILE: &str = "keyfile.log";

/// Document keys the metadata is stamped under.
pub const IDENTIFIER_KEY: &str = "Identifier";
pub const SHORT_IDENTIFIER_KEY: &str = "ShortIdentifier";
pub const DATE_KEY: &str = "Date";

/// Metadata derived purely from the bundle directory path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleMetadata {
    pub identifier: String,
    pub short_identifier: String,
    pub date: BundleDate,
}

impl BundleMetadata {
    /// Derive metadata from a bundle directory.
    ///
    /// The identifier is the directory name; the date comes from the name of
    /// its parent (the run directory).
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let identifier = dir_name(dir).ok_or_else(|| {
            Error::InvalidBundle(format!("{} has no directory name", dir.display()))
        })?;

        let date = dir
            .parent()
            .and_then(dir_name)
            .map(|name| BundleDate::parse(&name))
            .unwrap_or(BundleDate::Invalid);

        Ok(Self {
            short_identifier: short_identifier(&identifier),
            identifier,
            date,
        })
    }

    /// Write the metadata into a result document.
    pub fn stamp(&self, document: &mut Map<String, Value>) {
        document.insert(
            IDENTIFIER_KEY.to_string(),
            Value::String(self.identifier.clone()),
        );
        let date = match self.date.to_iso8601() {
            Some(s) => Value::String(s),
            None => Value::Null,
        };
        document.insert(DATE_KEY.to_string(), date);
        document.insert(
            SHORT_IDENTIFIER_KEY.to_string(),
            Value::String(self.short_identifier.clone()),
        );
    }
}

/// A loaded bundle, ready to hand to a sink.
#[derive(Debug, Clone)]
pub struct Bundle {
    /// Directory the bundle was loaded from.
    pub dir: PathBuf,
    pub metadata: BundleMetadata,
    pub upload: UploadReport,
}

impl Bundle {
    /// Assemble a bundle, stamping the derived metadata into the document.
    pub fn new(
        dir: PathBuf,
        mut document: Map<String, Value>,
        pcap_dump: String,
        keylog: String,
    ) -> Result<Self> {
        let metadata = BundleMetadata::from_dir(&dir)?;
        metadata.stamp(&mut document);

        Ok(Self {
            dir,
            metadata,
            upload: UploadReport {
                test_report: Value::Object(document),
                pcap_dump,
                keylog,
            },
        })
    }

    pub fn identifier(&self) -> &str {
        &self.metadata.identifier
    }

    /// Size of the encoded capture and key log.
    pub fn approx_size(&self) -> usize {
        self.upload.pcap_dump.len() + self.upload.keylog.len()
    }
}

/// Identifier of the bundle a result document belongs to.
pub fn identifier_for_result(result_path: &Path) -> Option<String> {
    result_path.parent().and_then(dir_name)
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_string())
}
