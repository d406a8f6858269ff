//! Worker pool: fixed set of tasks that claim jobs, drive the invoker, relay
//! progress and outcomes to the sink, and guarantee cleanup of temporary
//! files on every exit path.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::invoker::{TranscodeInvoker, TranscodeStats};
use crate::job::Job;
use crate::notify::{JobEvent, NotificationSink, SuccessReport};
use crate::progress::{ProgressReporter, ProgressUpdate};
use crate::stats::StatsAggregator;
use crate::store::JobStore;
use crate::utils::sanitize_filename;
use crate::Result;

/// Minimum percentage-point delta before a progress update is forwarded to
/// the sink.
const PROGRESS_MIN_DELTA: u8 = 5;

/// Smaller deltas still go out once this much time has passed since the last
/// forwarded update.
const PROGRESS_MIN_INTERVAL: Duration = Duration::from_secs(3);

/// Capacity of the per-job progress channel. Overflow drops updates; later
/// values supersede earlier ones.
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Configuration for the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Number of workers; one transcoding job per worker at a time.
    pub max_workers: usize,
    /// Poll fallback interval in milliseconds for when the queue wakeup is
    /// missed.
    pub poll_interval_ms: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 2,
            poll_interval_ms: 500,
        }
    }
}

/// Shared collaborators handed to every worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<JobStore>,
    pub invoker: Arc<TranscodeInvoker>,
    pub sink: Arc<dyn NotificationSink>,
    pub stats: Arc<StatsAggregator>,
    /// Directory where output artifacts are staged.
    pub output_dir: PathBuf,
}

/// Fixed-size pool of job-processing workers.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self {
            config,
            cancellation_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Start the worker tasks.
    pub fn start(&self, ctx: WorkerContext) {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        info!("Starting worker pool with {} workers", self.config.max_workers);

        let mut tasks = self.tasks.lock();
        if let Some(join_set) = tasks.as_mut() {
            for i in 0..self.config.max_workers {
                let ctx = ctx.clone();
                let token = self.cancellation_token.clone();
                let notifier = ctx.store.notifier();

                join_set.spawn(async move {
                    debug!("Worker {} started", i);

                    loop {
                        if token.is_cancelled() {
                            break;
                        }

                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = notifier.notified() => {}
                            _ = tokio::time::sleep(poll_interval) => {}
                        }

                        // Drain everything claimable before going back to
                        // sleep; one wakeup can cover several submissions.
                        while !token.is_cancelled()
                            && let Some(job) = ctx.store.claim_next(i)
                        {
                            process_job(&ctx, i, job).await;
                        }
                    }

                    debug!("Worker {} stopped", i);
                });
            }
        }
    }

    /// Stop the pool and wait for in-flight jobs to finish.
    pub async fn stop(&self) {
        info!("Stopping worker pool");
        self.cancellation_token.cancel();

        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };

        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }

        info!("Worker pool stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}

/// Process one claimed job end to end. Never propagates an error: failures
/// become sink notifications, and cleanup plus unregistration run on every
/// path out of the active state.
async fn process_job(ctx: &WorkerContext, worker: usize, job: Job) {
    let event = JobEvent::from(&job);
    let input_path = job.input_path.clone();
    let output_path = output_path_for(&ctx.output_dir, &job);
    ctx.store.set_output(&job.id, &output_path);

    let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
    let reporter = ProgressReporter::new(job.id.clone(), tx);
    let forwarder = tokio::spawn(forward_progress(
        rx,
        ctx.store.clone(),
        ctx.sink.clone(),
        event.clone(),
    ));

    let result = transcode(ctx, &job, &output_path, &reporter).await;

    // Close the progress channel and let the forwarder drain, so terminal
    // notifications never race a progress update.
    drop(reporter);
    if let Err(e) = forwarder.await {
        warn!("Progress forwarder for job {} aborted: {}", job.id, e);
    }

    match result {
        Ok(stats) => {
            ctx.stats.record_success(stats.original_size, stats.output_size);
            let report = SuccessReport {
                original_size: stats.original_size,
                compressed_size: stats.output_size,
                ratio: stats.ratio(),
                output_path: output_path.clone(),
            };
            info!(
                "Worker {}: job {} completed in {:.2}s ({} -> {} bytes)",
                worker, job.id, stats.elapsed_secs, stats.original_size, stats.output_size
            );
            ctx.sink.on_success(&event, &report).await;
        }
        Err(e) => {
            ctx.stats.record_failure();
            let reason = e.to_string();
            warn!("Worker {}: job {} failed: {}", worker, job.id, reason);
            ctx.sink.on_failure(&event, &reason).await;
        }
    }

    cleanup_files(&[&input_path, &output_path]).await;
    ctx.store.unregister(&job.id);
}

/// Probe, then transcode. Probing first means the transcoder is never run on
/// uninspected input.
async fn transcode(
    ctx: &WorkerContext,
    job: &Job,
    output_path: &Path,
    reporter: &ProgressReporter,
) -> Result<TranscodeStats> {
    let info = ctx.invoker.probe(&job.input_path).await?;
    debug!(
        "Job {}: probed {}x{} {} ({:.1}s)",
        job.id,
        info.width.unwrap_or(0),
        info.height.unwrap_or(0),
        info.codec.as_deref().unwrap_or("unknown"),
        info.duration_secs
    );
    if !info.has_duration() {
        debug!(
            "Job {}: input reports no duration, percentage progress disabled",
            job.id
        );
    }
    ctx.invoker
        .run(
            &job.input_path,
            output_path,
            &job.settings,
            info.duration_secs,
            reporter,
        )
        .await
}

/// Relay progress updates from the invoker to the store and, throttled, to
/// the sink. Forwarded values are strictly increasing for a given job.
async fn forward_progress(
    mut rx: mpsc::Receiver<ProgressUpdate>,
    store: Arc<JobStore>,
    sink: Arc<dyn NotificationSink>,
    event: JobEvent,
) {
    let mut last_sent: Option<u8> = None;
    let mut last_sent_at = Instant::now();

    while let Some(update) = rx.recv().await {
        let Some(percent) = store.update_progress(&event.id, update.percent) else {
            continue;
        };

        let interval_elapsed = last_sent_at.elapsed() >= PROGRESS_MIN_INTERVAL;
        if should_forward(last_sent, percent, interval_elapsed) {
            sink.on_progress(&event, percent).await;
            last_sent = Some(percent);
            last_sent_at = Instant::now();
        }
    }
}

/// Throttling decision: always forward the first value, then only strictly
/// higher values that moved at least [`PROGRESS_MIN_DELTA`] points or waited
/// out the interval. Skipping intermediates is fine; delivering a lower value
/// after a higher one is not.
fn should_forward(last_sent: Option<u8>, percent: u8, interval_elapsed: bool) -> bool {
    match last_sent {
        None => true,
        Some(prev) if percent <= prev => false,
        Some(prev) => percent - prev >= PROGRESS_MIN_DELTA || interval_elapsed,
    }
}

/// Output artifact path: short job-id prefix plus the sanitized display name.
fn output_path_for(dir: &Path, job: &Job) -> PathBuf {
    let safe = sanitize_filename(&job.display_name);
    let stem = Path::new(&safe)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let short_id = job.id.get(..8).unwrap_or(&job.id);
    dir.join(format!("{short_id}-{stem}.mp4"))
}

/// Best-effort removal of a job's temporary files. Missing files are fine;
/// other failures are logged and swallowed so cleanup can never crash the
/// worker loop.
async fn cleanup_files(paths: &[&Path]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(_) => debug!("Removed temporary file {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::TranscodeSettings;
    use crate::notify::test_support::{RecordingSink, SinkEvent};

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.poll_interval_ms, 500);
    }

    #[test]
    fn test_worker_pool_lifecycle_flag() {
        let pool = WorkerPool::new(WorkerPoolConfig::default());
        assert!(pool.is_running());
    }

    #[test]
    fn test_should_forward_first_value() {
        assert!(should_forward(None, 0, false));
        assert!(should_forward(None, 42, false));
    }

    #[test]
    fn test_should_forward_delta_threshold() {
        assert!(!should_forward(Some(10), 12, false));
        assert!(should_forward(Some(10), 15, false));
        // Small delta goes out once the interval has passed.
        assert!(should_forward(Some(10), 12, true));
    }

    #[test]
    fn test_should_forward_never_regresses() {
        assert!(!should_forward(Some(50), 50, true));
        assert!(!should_forward(Some(50), 30, true));
    }

    #[test]
    fn test_output_path_sanitizes_display_name() {
        let job = Job::new(
            1,
            "/tmp/in.mp4",
            "my clip?.mp4",
            100,
            TranscodeSettings::default(),
        );
        let path = output_path_for(Path::new("/work/out"), &job);
        let name = path.file_name().unwrap().to_str().unwrap();

        assert!(name.starts_with(job.id.get(..8).unwrap()));
        assert!(name.ends_with("-my clip_.mp4"));
        assert!(!name.contains('?'));
    }

    #[tokio::test]
    async fn test_forward_progress_monotonic_and_throttled() {
        let store = Arc::new(JobStore::new(4));
        let id = store
            .submit(
                1,
                "/tmp/in.mp4",
                "in.mp4",
                100,
                TranscodeSettings::default(),
            )
            .unwrap();
        let job = store.claim_next(0).unwrap();
        let sink = Arc::new(RecordingSink::default());

        let (tx, rx) = mpsc::channel(16);
        let reporter = ProgressReporter::new(id.clone(), tx);
        let handle = tokio::spawn(forward_progress(
            rx,
            store.clone(),
            sink.clone(),
            JobEvent::from(&job),
        ));

        for pct in [10u8, 12, 50, 40, 95] {
            reporter.report(pct);
        }
        drop(reporter);
        handle.await.unwrap();

        // 12 is under the delta threshold, 40 is a regression; both skipped.
        assert_eq!(sink.progress_for(&id), vec![10, 50, 95]);
    }

    #[tokio::test]
    async fn test_forward_progress_ignores_unknown_job() {
        let store = Arc::new(JobStore::new(4));
        let sink = Arc::new(RecordingSink::default());
        let event = JobEvent {
            id: "ghost".to_string(),
            owner_id: 1,
            display_name: "ghost.mp4".to_string(),
        };

        let (tx, rx) = mpsc::channel(4);
        let reporter = ProgressReporter::new("ghost", tx);
        let handle = tokio::spawn(forward_progress(rx, store, sink.clone(), event));

        reporter.report(10);
        drop(reporter);
        handle.await.unwrap();

        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_files_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.mp4");
        tokio::fs::write(&present, b"data").await.unwrap();
        let missing = dir.path().join("missing.mp4");

        cleanup_files(&[present.as_path(), missing.as_path()]).await;
        assert!(!present.exists());
    }

    #[tokio::test]
    async fn test_sink_event_order_progress_then_terminal() {
        // The forwarder is always drained before the terminal notification,
        // mirroring process_job's sequencing.
        let store = Arc::new(JobStore::new(4));
        let id = store
            .submit(
                1,
                "/tmp/in.mp4",
                "in.mp4",
                100,
                TranscodeSettings::default(),
            )
            .unwrap();
        let job = store.claim_next(0).unwrap();
        let event = JobEvent::from(&job);
        let sink = Arc::new(RecordingSink::default());

        let (tx, rx) = mpsc::channel(4);
        let reporter = ProgressReporter::new(id.clone(), tx);
        let handle = tokio::spawn(forward_progress(
            rx,
            store.clone(),
            sink.clone(),
            event.clone(),
        ));
        reporter.report(99);
        drop(reporter);
        handle.await.unwrap();
        sink.on_failure(&event, "boom").await;

        let events = sink.events();
        assert_eq!(events[0], SinkEvent::Progress(id.clone(), 99));
        assert_eq!(events[1], SinkEvent::Failure(id, "boom".to_string()));
    }
}
