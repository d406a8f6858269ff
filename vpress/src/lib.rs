//! vpress: a queued media-compression core.
//!
//! A size-bounded FIFO of submitted jobs is drained by a fixed pool of
//! workers, each supervising one external transcoder process at a time.
//! Progress parsed from the transcoder's diagnostic stream flows to a
//! [`NotificationSink`]; temporary files are cleaned up on every exit path,
//! and a background janitor sweeps anything left behind.

pub mod config;
pub mod error;
pub mod invoker;
pub mod janitor;
pub mod job;
pub mod logging;
pub mod notify;
pub mod progress;
pub mod service;
pub mod stats;
pub mod store;
pub mod utils;
pub mod worker;

pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use invoker::{MediaInfo, TranscodeInvoker, TranscodeStats};
pub use janitor::{Janitor, JanitorConfig};
pub use job::{Job, JobId, JobState, TranscodeSettings};
pub use notify::{JobEvent, NotificationSink, SuccessReport, TracingSink};
pub use progress::ProgressReporter;
pub use service::{CompressionService, ServiceStatus};
pub use stats::{StatsAggregator, StatsSnapshot};
pub use store::{CancelOutcome, JobStore};
pub use worker::{WorkerContext, WorkerPool, WorkerPoolConfig};
