//! Bundle schema definitions for resultsync.
//!
//! A bundle is one test-harness run: a directory holding the result
//! document, the packet capture and the TLS key log. This crate defines the
//! in-memory bundle, the metadata derived from its location on disk and the
//! payload handed to sinks.

pub mod bundle;
pub mod naming;
pub mod snapshot;
pub mod upload;

pub use bundle::{
    identifier_for_result, Bundle, BundleMetadata, KEYLOG_FILE, PCAP_FILE, RESULT_FILE,
};
pub use naming::short_identifier;
pub use snapshot::IdentifierSnapshot;
pub use upload::UploadReport;
