//! Identifiers already present in a sink.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Set of identifiers fetched once at the start of a run.
///
/// Read-only for the rest of the run; it is never refreshed, so two bundles
/// sharing an identifier in one run are both attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentifierSnapshot(HashSet<String>);

impl IdentifierSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.0.contains(identifier)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for IdentifierSnapshot {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
