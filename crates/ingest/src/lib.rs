//! Resultsync ingest - scan harness output and deliver new bundles to a sink.

pub mod cancel;
pub mod config;
pub mod dispatcher;
pub mod loader;
pub mod pipeline;
pub mod pool;
pub mod report;
pub mod retry;
pub mod scanner;
pub mod sink;

pub use cancel::CancellationToken;
pub use config::{CancelMode, IngestConfig, SinkMode};
pub use dispatcher::Dispatcher;
pub use pipeline::Pipeline;
pub use report::RunReport;
pub use sink::{Sink, SinkError};
