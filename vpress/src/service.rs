//! Service wiring: owns the store, worker pool, janitor, and stats, with an
//! explicit start/stop lifecycle and the status snapshot surface.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::invoker::TranscodeInvoker;
use crate::job::{ActiveJobSnapshot, JobId, QueuedJobSnapshot, TranscodeSettings};
use crate::janitor::{Janitor, JanitorConfig};
use crate::notify::{JobEvent, NotificationSink};
use crate::stats::{StatsAggregator, StatsSnapshot};
use crate::store::{CancelOutcome, JobStore};
use crate::worker::{WorkerContext, WorkerPool, WorkerPoolConfig};
use crate::Result;

/// Combined read surface for any reporting layer.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub pending: Vec<QueuedJobSnapshot>,
    pub active: Vec<ActiveJobSnapshot>,
    pub stats: StatsSnapshot,
}

/// The compression service: bounded job queue, worker pool, janitor, and
/// cumulative stats behind one lifecycle.
pub struct CompressionService {
    config: ServiceConfig,
    store: Arc<JobStore>,
    stats: Arc<StatsAggregator>,
    invoker: Arc<TranscodeInvoker>,
    sink: Arc<dyn NotificationSink>,
    pool: WorkerPool,
    janitor: Janitor,
    shutdown_token: CancellationToken,
}

impl CompressionService {
    /// Wire up a service from configuration. Fails on invalid configuration;
    /// nothing runs until [`start`](Self::start).
    pub fn new(config: ServiceConfig, sink: Arc<dyn NotificationSink>) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(JobStore::new(config.max_queue_size));
        let stats = Arc::new(StatsAggregator::new());
        let invoker = Arc::new(TranscodeInvoker::from_config(&config));
        let pool = WorkerPool::new(WorkerPoolConfig {
            max_workers: config.max_workers,
            poll_interval_ms: config.poll_interval_ms,
        });
        let janitor = Janitor::new(
            JanitorConfig::new()
                .with_retention_secs(config.retention_secs)
                .with_sweep_interval_secs(config.sweep_interval_secs),
            store.clone(),
            vec![config.in_dir(), config.out_dir()],
        );

        Ok(Self {
            config,
            store,
            stats,
            invoker,
            sink,
            pool,
            janitor,
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Create the staging directories and start the workers and the janitor.
    pub async fn start(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.config.in_dir()).await?;
        tokio::fs::create_dir_all(self.config.out_dir()).await?;

        match self.invoker.version() {
            Some(version) => info!("Using transcoder: {}", version),
            None => warn!(
                "Transcoder binary {:?} did not respond to a version check; jobs will fail",
                self.config.ffmpeg_path
            ),
        }

        self.pool.start(WorkerContext {
            store: self.store.clone(),
            invoker: self.invoker.clone(),
            sink: self.sink.clone(),
            stats: self.stats.clone(),
            output_dir: self.config.out_dir(),
        });
        self.janitor.start(self.shutdown_token.child_token());

        info!(
            "Compression service started ({} workers, queue capacity {})",
            self.config.max_workers, self.config.max_queue_size
        );
        Ok(())
    }

    /// Submit a job. `settings` defaults to the configuration-derived
    /// profile. Fails synchronously with `QueueFull` at capacity.
    pub fn submit(
        &self,
        owner_id: i64,
        input_path: impl Into<PathBuf>,
        display_name: impl Into<String>,
        size_bytes: u64,
        settings: Option<TranscodeSettings>,
    ) -> Result<JobId> {
        let settings = settings.unwrap_or_else(|| self.config.default_settings());
        self.store
            .submit(owner_id, input_path, display_name, size_bytes, settings)
    }

    /// Cancel all of an owner's still-queued jobs and acknowledge each one
    /// through the sink. Active jobs are unaffected.
    pub async fn cancel_owned(&self, owner_id: i64) -> CancelOutcome {
        let outcome = self.store.cancel_owned(owner_id).await;
        for job in &outcome.jobs {
            self.sink.on_cancelled(&JobEvent::from(job)).await;
        }
        outcome
    }

    /// Point-in-time status: queue contents, active jobs with progress, and
    /// cumulative stats.
    pub fn status(&self) -> ServiceStatus {
        let snapshot = self.store.snapshot();
        ServiceStatus {
            pending: snapshot.pending,
            active: snapshot.active,
            stats: self.stats.snapshot(),
        }
    }

    /// Stop the janitor, then stop the workers, waiting for in-flight jobs.
    pub async fn shutdown(&self) {
        info!("Shutting down compression service");
        self.shutdown_token.cancel();
        self.pool.stop().await;
    }
}
