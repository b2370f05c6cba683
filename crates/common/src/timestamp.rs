//! Bundle timestamps.
//!
//! Harness output is grouped under directories named after the run start,
//! formatted `DD-MM-YY_HHmmss` (for example `21-05-23_153000`).

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

/// chrono format matching `DD-MM-YY_HHmmss`.
pub const RUN_DIR_FORMAT: &str = "%d-%m-%y_%H%M%S";

/// Date attached to a bundle, derived from its run directory name.
///
/// An unparsable directory name produces [`BundleDate::Invalid`] instead of
/// an error so that one oddly named folder never blocks ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleDate {
    Valid(NaiveDateTime),
    Invalid,
}

impl BundleDate {
    /// Parse a run directory name.
    pub fn parse(dir_name: &str) -> Self {
        match NaiveDateTime::parse_from_str(dir_name, RUN_DIR_FORMAT) {
            Ok(dt) => BundleDate::Valid(dt),
            Err(_) => BundleDate::Invalid,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, BundleDate::Valid(_))
    }

    /// Interpret the naive directory time as UTC.
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            BundleDate::Valid(dt) => Some(dt.and_utc()),
            BundleDate::Invalid => None,
        }
    }

    /// Format as ISO 8601 string, `None` for the invalid marker.
    pub fn to_iso8601(&self) -> Option<String> {
        self.to_utc()
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
    }
}

impl fmt::Display for BundleDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_iso8601() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "Invalid Date"),
        }
    }
}

/// Serialized as an ISO 8601 string, or `null` when invalid.
impl Serialize for BundleDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.to_iso8601() {
            Some(s) => serializer.serialize_str(&s),
            None => serializer.serialize_none(),
        }
    }
}
