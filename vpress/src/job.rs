//! Job model: submitted work units and their lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique job identifier (UUID v4, string form).
pub type JobId = String;

/// Lifecycle state of a job.
///
/// Transitions are one-way: `Queued -> Active -> {Completed | Failed |
/// Cancelled}`. Terminal jobs are not retained in the live data model; they
/// only fold into the stats counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting in the pending FIFO.
    Queued,
    /// Claimed by a worker and being transcoded.
    Active,
    /// Transcode finished and the result was handed off.
    Completed,
    /// Probe or transcode failed.
    Failed,
    /// Removed from the queue before a worker claimed it.
    Cancelled,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Active => write!(f, "active"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Immutable transcoding parameters, snapshotted at submission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeSettings {
    /// Video filter expression for the target resolution (e.g. `scale=1280:-2`).
    pub resolution: String,
    /// Constant rate factor. Takes precedence over any bitrate target.
    #[serde(default)]
    pub crf: Option<u8>,
    /// Explicit video bitrate in kbps. Skips the size-based heuristic.
    #[serde(default)]
    pub video_bitrate_kbps: Option<u32>,
    /// Audio bitrate in kbps.
    pub audio_bitrate_kbps: u32,
    /// Desired output size in MB, driving the bitrate heuristic when no
    /// explicit rate is set.
    #[serde(default)]
    pub target_size_mb: Option<u32>,
}

impl TranscodeSettings {
    /// Set the CRF, overriding bitrate targeting.
    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = Some(crf);
        self
    }

    /// Set an explicit video bitrate in kbps.
    pub fn with_video_bitrate_kbps(mut self, kbps: u32) -> Self {
        self.video_bitrate_kbps = Some(kbps);
        self
    }

    /// Set the target output size in MB.
    pub fn with_target_size_mb(mut self, mb: u32) -> Self {
        self.target_size_mb = Some(mb);
        self
    }
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            resolution: "scale=1280:-2".to_string(),
            crf: None,
            video_bitrate_kbps: None,
            audio_bitrate_kbps: 128,
            target_size_mb: Some(50),
        }
    }
}

/// A submitted unit of work.
///
/// The job owns its input file exclusively until it reaches a terminal state,
/// at which point the worker (or cancellation) removes it.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job ID, stable for the job's lifetime.
    pub id: JobId,
    /// Identity of the submitter, used for ownership checks.
    pub owner_id: i64,
    /// Filesystem location of the source media.
    pub input_path: PathBuf,
    /// Human-readable label (original filename). Untrusted; sanitize before
    /// deriving any filesystem path from it.
    pub display_name: String,
    /// Size of the input at submission time.
    pub size_bytes: u64,
    /// Transcoding parameters, never mutated after creation.
    pub settings: TranscodeSettings,
    /// When the job was submitted.
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    /// Create a new queued job with a fresh ID.
    pub fn new(
        owner_id: i64,
        input_path: impl Into<PathBuf>,
        display_name: impl Into<String>,
        size_bytes: u64,
        settings: TranscodeSettings,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id,
            input_path: input_path.into(),
            display_name: display_name.into(),
            size_bytes,
            settings,
            submitted_at: Utc::now(),
        }
    }
}

/// Bookkeeping for a job while it is active on a worker.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub job: Job,
    /// Index of the owning worker.
    pub worker: usize,
    pub started_at: DateTime<Utc>,
    /// Last known completion estimate, clamped to [0, 99] and monotonically
    /// non-decreasing.
    pub progress_percent: u8,
    /// Output artifact path, registered by the worker before invocation so the
    /// janitor can cross-reference in-use files.
    pub output_path: Option<PathBuf>,
}

impl ActiveJob {
    pub fn new(job: Job, worker: usize) -> Self {
        Self {
            job,
            worker,
            started_at: Utc::now(),
            progress_percent: 0,
            output_path: None,
        }
    }
}

/// Point-in-time view of one queued job, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedJobSnapshot {
    pub id: JobId,
    pub owner_id: i64,
    pub display_name: String,
    pub size_bytes: u64,
    /// Zero-based position in the pending FIFO.
    pub position: usize,
    pub submitted_at: DateTime<Utc>,
}

/// Point-in-time view of one active job, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveJobSnapshot {
    pub id: JobId,
    pub owner_id: i64,
    pub display_name: String,
    pub size_bytes: u64,
    pub worker: usize,
    pub progress_percent: u8,
    pub started_at: DateTime<Utc>,
}

/// Read-only copy of the store contents.
#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    pub pending: Vec<QueuedJobSnapshot>,
    pub active: Vec<ActiveJobSnapshot>,
}
