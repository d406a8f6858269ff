//! Notification sink interface.
//!
//! The core reports progress and terminal outcomes through this trait; the
//! real system implements it in the chat layer. Sink methods return nothing:
//! implementations absorb their own delivery errors so a broken sink can
//! never abort a worker's cleanup.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::job::{Job, JobId};
use crate::utils::format_bytes;

/// The identifying slice of a job that sink calls carry.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub id: JobId,
    pub owner_id: i64,
    pub display_name: String,
}

impl From<&Job> for JobEvent {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            owner_id: job.owner_id,
            display_name: job.display_name.clone(),
        }
    }
}

/// Payload of a successful completion.
#[derive(Debug, Clone)]
pub struct SuccessReport {
    pub original_size: u64,
    pub compressed_size: u64,
    /// `original / compressed` for this job.
    pub ratio: f64,
    pub output_path: PathBuf,
}

/// Receiver for progress updates and terminal outcomes.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Throttled progress update; `percent` is in [0, 99] and non-decreasing
    /// per job.
    async fn on_progress(&self, job: &JobEvent, percent: u8);

    /// Exactly one terminal notification per processed job: this one on
    /// success...
    async fn on_success(&self, job: &JobEvent, report: &SuccessReport);

    /// ...or this one on probe/transcode failure.
    async fn on_failure(&self, job: &JobEvent, reason: &str);

    /// Acknowledgment for a job cancelled while still queued.
    async fn on_cancelled(&self, job: &JobEvent);
}

/// Sink that logs every event through `tracing`, for headless operation.
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn on_progress(&self, job: &JobEvent, percent: u8) {
        info!("[{}] {}: {}%", job.id, job.display_name, percent);
    }

    async fn on_success(&self, job: &JobEvent, report: &SuccessReport) {
        info!(
            "[{}] {} done: {} -> {} (ratio {:.2}) at {}",
            job.id,
            job.display_name,
            format_bytes(report.original_size),
            format_bytes(report.compressed_size),
            report.ratio,
            report.output_path.display()
        );
    }

    async fn on_failure(&self, job: &JobEvent, reason: &str) {
        warn!("[{}] {} failed: {}", job.id, job.display_name, reason);
    }

    async fn on_cancelled(&self, job: &JobEvent) {
        info!("[{}] {} cancelled", job.id, job.display_name);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Recording sink shared by unit and integration-style tests.

    use super::*;
    use parking_lot::Mutex;

    /// Every event a [`RecordingSink`] has observed, in delivery order.
    #[derive(Debug, Clone, PartialEq)]
    pub enum SinkEvent {
        Progress(JobId, u8),
        Success(JobId, u64, u64),
        Failure(JobId, String),
        Cancelled(JobId),
    }

    #[derive(Default)]
    pub struct RecordingSink {
        pub events: Mutex<Vec<SinkEvent>>,
    }

    impl RecordingSink {
        pub fn events(&self) -> Vec<SinkEvent> {
            self.events.lock().clone()
        }

        pub fn progress_for(&self, job_id: &str) -> Vec<u8> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    SinkEvent::Progress(id, pct) if id == job_id => Some(pct),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn on_progress(&self, job: &JobEvent, percent: u8) {
            self.events
                .lock()
                .push(SinkEvent::Progress(job.id.clone(), percent));
        }

        async fn on_success(&self, job: &JobEvent, report: &SuccessReport) {
            self.events.lock().push(SinkEvent::Success(
                job.id.clone(),
                report.original_size,
                report.compressed_size,
            ));
        }

        async fn on_failure(&self, job: &JobEvent, reason: &str) {
            self.events
                .lock()
                .push(SinkEvent::Failure(job.id.clone(), reason.to_string()));
        }

        async fn on_cancelled(&self, job: &JobEvent) {
            self.events.lock().push(SinkEvent::Cancelled(job.id.clone()));
        }
    }
}
