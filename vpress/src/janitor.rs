//! Janitor service for automatic cleanup of stale temporary files.
//!
//! Runs on a fixed interval and deletes files in the staging directories
//! whose modification time is older than the retention threshold. Files
//! referenced by a queued or active job are never touched; the store is the
//! source of truth for what is in use.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::JobStore;
use crate::utils::format_bytes;

fn default_retention_secs() -> u64 {
    7200
}

fn default_sweep_interval_secs() -> u64 {
    600
}

/// Configuration for the janitor sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JanitorConfig {
    /// Age threshold in seconds; files younger than this are kept.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Interval between sweeps in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl JanitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retention threshold.
    pub fn with_retention_secs(mut self, secs: u64) -> Self {
        self.retention_secs = secs;
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }
}

/// Background sweep over the staging directories.
#[derive(Clone)]
pub struct Janitor {
    config: JanitorConfig,
    store: Arc<JobStore>,
    dirs: Vec<PathBuf>,
}

impl Janitor {
    pub fn new(config: JanitorConfig, store: Arc<JobStore>, dirs: Vec<PathBuf>) -> Self {
        Self {
            config,
            store,
            dirs,
        }
    }

    /// Run a single sweep. Returns the number of files removed and the bytes
    /// freed.
    pub async fn sweep_once(&self) -> (usize, u64) {
        let in_use = self.store.referenced_paths();
        let mut removed = 0usize;
        let mut freed = 0u64;

        for dir in &self.dirs {
            let mut entries = match tokio::fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    debug!("Janitor skipping {}: {}", dir.display(), e);
                    continue;
                }
            };

            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let Ok(meta) = entry.metadata().await else {
                    continue;
                };
                if !meta.is_file() {
                    continue;
                }
                if in_use.contains(&path) {
                    continue;
                }

                let stale = meta
                    .modified()
                    .ok()
                    .and_then(|m| m.elapsed().ok())
                    .map(|age| age.as_secs() >= self.config.retention_secs)
                    .unwrap_or(false);
                if !stale {
                    continue;
                }

                match tokio::fs::remove_file(&path).await {
                    Ok(_) => {
                        removed += 1;
                        freed += meta.len();
                        debug!("Janitor removed stale file {}", path.display());
                    }
                    Err(e) => {
                        warn!("Janitor failed to remove {}: {}", path.display(), e);
                    }
                }
            }
        }

        if removed > 0 {
            info!(
                "Janitor removed {} stale file(s), freed {}",
                removed,
                format_bytes(freed)
            );
        }

        (removed, freed)
    }

    /// Start the background sweep task.
    pub fn start(&self, cancellation_token: CancellationToken) {
        let janitor = self.clone();
        let sweep_interval = Duration::from_secs(self.config.sweep_interval_secs);

        tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);

            info!(
                "Janitor started (retention: {}s, interval: {}s)",
                janitor.config.retention_secs, janitor.config.sweep_interval_secs
            );

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Janitor shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        janitor.sweep_once().await;
                    }
                }
            }
        });
    }
}
