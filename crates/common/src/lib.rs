//! Common utilities and types shared across resultsync crates.

pub mod error;
pub mod timestamp;

pub use error::{Error, Result};
pub use timestamp::BundleDate;
