//! Recursive discovery of result documents.

use regex::Regex;
use resultsync_common::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Paths found by a scan, sorted.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub paths: Vec<PathBuf>,
    /// Subdirectories that could not be listed and were skipped.
    pub unreadable_dirs: usize,
}

/// Walks a directory tree looking for result documents.
pub struct Scanner {
    pattern: Regex,
}

impl Scanner {
    /// Scanner matching file names against `pattern`.
    pub fn new(pattern: Regex) -> Self {
        Self { pattern }
    }

    /// Scan `root` recursively.
    ///
    /// The root must be a readable directory. Unreadable subdirectories are
    /// logged and skipped. Paths are sorted by their full string form so the
    /// result is identical across runs over the same tree.
    pub fn scan(&self, root: &Path) -> Result<ScanResult> {
        std::fs::read_dir(root).map_err(|e| Error::ScanRoot {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut result = ScanResult::default();

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(
                        path = ?e.path(),
                        "Skipping unreadable directory: {}",
                        e
                    );
                    result.unreadable_dirs += 1;
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            if self.pattern.is_match(&entry.file_name().to_string_lossy()) {
                result.paths.push(entry.into_path());
            }
        }

        result
            .paths
            .sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));
        debug!(
            root = %root.display(),
            found = result.paths.len(),
            "Scan finished"
        );

        Ok(result)
    }
}
