//! In-memory job store: the bounded pending FIFO and the active-job table.
//!
//! The store is the single serialization point for all job-state mutation.
//! Every read-modify-write sequence (submit-if-not-full, claim-and-register,
//! cancel-and-remove) runs under one mutex so the queue/active invariants hold
//! under arbitrary worker and caller interleaving.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::job::{
    ActiveJob, ActiveJobSnapshot, Job, JobId, JobState, QueuedJobSnapshot, StoreSnapshot,
    TranscodeSettings,
};
use crate::{Error, Result};

/// Progress values are clamped here until the job reaches a terminal state.
const PROGRESS_CAP: u8 = 99;

#[derive(Debug, Default)]
struct StoreInner {
    pending: VecDeque<Job>,
    active: HashMap<JobId, ActiveJob>,
}

/// Outcome of a [`JobStore::cancel_owned`] call.
#[derive(Debug, Default)]
pub struct CancelOutcome {
    /// Number of queued jobs removed.
    pub removed: usize,
    /// Sum of the removed jobs' input sizes.
    pub freed_bytes: u64,
    /// The removed jobs, for cancellation acknowledgments.
    pub jobs: Vec<Job>,
}

/// Thread-safe holder of the pending queue and the in-flight job table.
pub struct JobStore {
    capacity: usize,
    inner: Mutex<StoreInner>,
    notify: Arc<Notify>,
}

impl JobStore {
    /// Create a store with the given pending-queue capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(StoreInner::default()),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Notifier signalled whenever a job is enqueued.
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Submit a new job.
    ///
    /// Fails with [`Error::QueueFull`] when the pending queue is at capacity;
    /// the submission is rejected, never blocked.
    pub fn submit(
        &self,
        owner_id: i64,
        input_path: impl Into<PathBuf>,
        display_name: impl Into<String>,
        size_bytes: u64,
        settings: TranscodeSettings,
    ) -> Result<JobId> {
        let job = Job::new(owner_id, input_path, display_name, size_bytes, settings);
        let job_id = job.id.clone();

        {
            let mut inner = self.inner.lock();
            if inner.pending.len() >= self.capacity {
                return Err(Error::QueueFull {
                    capacity: self.capacity,
                });
            }
            inner.pending.push_back(job);
        }

        info!("Enqueued job {} (owner {})", job_id, owner_id);
        self.notify.notify_one();
        Ok(job_id)
    }

    /// Pop the head of the FIFO and register it as active on `worker`, as one
    /// atomic step. Returns `None` when the queue is empty.
    pub fn claim_next(&self, worker: usize) -> Option<Job> {
        let mut inner = self.inner.lock();
        let job = inner.pending.pop_front()?;
        let claimed = job.clone();
        inner
            .active
            .insert(job.id.clone(), ActiveJob::new(job, worker));
        debug!("Worker {} claimed job {}", worker, claimed.id);
        Some(claimed)
    }

    /// Record the output artifact path for an active job so the janitor can
    /// treat it as in use.
    pub fn set_output(&self, job_id: &str, output_path: impl Into<PathBuf>) {
        let mut inner = self.inner.lock();
        if let Some(active) = inner.active.get_mut(job_id) {
            active.output_path = Some(output_path.into());
        }
    }

    /// Update the progress estimate for an active job.
    ///
    /// The value is clamped to [0, 99] and regressions are ignored, so the
    /// stored estimate never decreases. Returns the effective stored value, or
    /// `None` if the job is not active.
    pub fn update_progress(&self, job_id: &str, percent: u8) -> Option<u8> {
        let mut inner = self.inner.lock();
        let active = inner.active.get_mut(job_id)?;
        let clamped = percent.min(PROGRESS_CAP);
        if clamped > active.progress_percent {
            active.progress_percent = clamped;
        }
        Some(active.progress_percent)
    }

    /// Remove a job from the active table.
    pub fn unregister(&self, job_id: &str) -> Option<ActiveJob> {
        let removed = self.inner.lock().active.remove(job_id);
        if removed.is_none() {
            warn!("Unregister for unknown job {}", job_id);
        }
        removed
    }

    /// Remove all of the owner's still-queued jobs and delete their input
    /// files. Active jobs are not touched.
    ///
    /// File deletion is best-effort and happens outside the lock.
    pub async fn cancel_owned(&self, owner_id: i64) -> CancelOutcome {
        let removed_jobs = {
            let mut inner = self.inner.lock();
            let mut kept = VecDeque::with_capacity(inner.pending.len());
            let mut removed = Vec::new();
            for job in inner.pending.drain(..) {
                if job.owner_id == owner_id {
                    removed.push(job);
                } else {
                    kept.push_back(job);
                }
            }
            inner.pending = kept;
            removed
        };

        let mut outcome = CancelOutcome {
            removed: removed_jobs.len(),
            ..Default::default()
        };

        for job in &removed_jobs {
            outcome.freed_bytes += job.size_bytes;
            if let Err(e) = tokio::fs::remove_file(&job.input_path).await {
                warn!(
                    "Failed to delete input of cancelled job {}: {}",
                    job.id, e
                );
            }
        }

        if outcome.removed > 0 {
            info!(
                "Cancelled {} queued job(s) for owner {} ({} bytes freed)",
                outcome.removed, owner_id, outcome.freed_bytes
            );
        }

        outcome.jobs = removed_jobs;
        outcome
    }

    /// Point-in-time copy of the pending and active entries.
    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.lock();
        let pending = inner
            .pending
            .iter()
            .enumerate()
            .map(|(position, job)| QueuedJobSnapshot {
                id: job.id.clone(),
                owner_id: job.owner_id,
                display_name: job.display_name.clone(),
                size_bytes: job.size_bytes,
                position,
                submitted_at: job.submitted_at,
            })
            .collect();
        let active = inner
            .active
            .values()
            .map(|active| ActiveJobSnapshot {
                id: active.job.id.clone(),
                owner_id: active.job.owner_id,
                display_name: active.job.display_name.clone(),
                size_bytes: active.job.size_bytes,
                worker: active.worker,
                progress_percent: active.progress_percent,
                started_at: active.started_at,
            })
            .collect();
        StoreSnapshot { pending, active }
    }

    /// Every path currently referenced by a queued or active job.
    pub fn referenced_paths(&self) -> HashSet<PathBuf> {
        let inner = self.inner.lock();
        let mut paths = HashSet::new();
        for job in &inner.pending {
            paths.insert(job.input_path.clone());
        }
        for active in inner.active.values() {
            paths.insert(active.job.input_path.clone());
            if let Some(out) = &active.output_path {
                paths.insert(out.clone());
            }
        }
        paths
    }

    /// Lifecycle state of a live job. `None` once the job has reached a
    /// terminal state and left the store.
    pub fn state_of(&self, job_id: &str) -> Option<JobState> {
        let inner = self.inner.lock();
        if inner.active.contains_key(job_id) {
            return Some(JobState::Active);
        }
        if inner.pending.iter().any(|job| job.id == job_id) {
            return Some(JobState::Queued);
        }
        None
    }

    /// Number of queued jobs.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Number of active jobs.
    pub fn active_len(&self) -> usize {
        self.inner.lock().active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit_one(store: &JobStore, owner: i64, name: &str, size: u64) -> JobId {
        // Inputs under a directory that never exists; cancellation's
        // best-effort deletion must tolerate that.
        store
            .submit(
                owner,
                format!("/vpress-test-missing/{name}"),
                name,
                size,
                TranscodeSettings::default(),
            )
            .unwrap()
    }

    #[test]
    fn test_submit_rejects_when_full() {
        let store = JobStore::new(2);
        submit_one(&store, 1, "a.mp4", 10);
        submit_one(&store, 1, "b.mp4", 10);

        let result = store.submit(
            1,
            "/tmp/c.mp4",
            "c.mp4",
            10,
            TranscodeSettings::default(),
        );
        assert!(matches!(result, Err(Error::QueueFull { capacity: 2 })));
        assert_eq!(store.pending_len(), 2);
    }

    #[test]
    fn test_fifo_order() {
        let store = JobStore::new(10);
        let a = submit_one(&store, 1, "a.mp4", 10);
        let b = submit_one(&store, 1, "b.mp4", 10);
        let c = submit_one(&store, 1, "c.mp4", 10);

        assert_eq!(store.claim_next(0).unwrap().id, a);
        assert_eq!(store.claim_next(0).unwrap().id, b);
        assert_eq!(store.claim_next(0).unwrap().id, c);
        assert!(store.claim_next(0).is_none());
    }

    #[test]
    fn test_claim_moves_job_to_active() {
        let store = JobStore::new(10);
        let id = submit_one(&store, 1, "a.mp4", 10);

        let job = store.claim_next(3).unwrap();
        assert_eq!(job.id, id);
        assert_eq!(store.pending_len(), 0);
        assert_eq!(store.active_len(), 1);

        // The id is never in both structures at once.
        let snapshot = store.snapshot();
        assert!(snapshot.pending.is_empty());
        assert_eq!(snapshot.active[0].id, id);
        assert_eq!(snapshot.active[0].worker, 3);
    }

    #[test]
    fn test_progress_monotonic_and_clamped() {
        let store = JobStore::new(10);
        let id = submit_one(&store, 1, "a.mp4", 10);
        store.claim_next(0).unwrap();

        assert_eq!(store.update_progress(&id, 10), Some(10));
        assert_eq!(store.update_progress(&id, 50), Some(50));
        // Regressions are ignored.
        assert_eq!(store.update_progress(&id, 30), Some(50));
        // Values above the cap clamp to 99.
        assert_eq!(store.update_progress(&id, 150), Some(99));
    }

    #[test]
    fn test_update_progress_unknown_job() {
        let store = JobStore::new(10);
        assert_eq!(store.update_progress("missing", 10), None);
    }

    #[test]
    fn test_state_of_tracks_lifecycle() {
        let store = JobStore::new(10);
        let id = submit_one(&store, 1, "a.mp4", 10);
        assert_eq!(store.state_of(&id), Some(JobState::Queued));

        store.claim_next(0).unwrap();
        assert_eq!(store.state_of(&id), Some(JobState::Active));

        store.unregister(&id);
        assert_eq!(store.state_of(&id), None);
    }

    #[test]
    fn test_unregister() {
        let store = JobStore::new(10);
        let id = submit_one(&store, 1, "a.mp4", 10);
        store.claim_next(0).unwrap();

        assert!(store.unregister(&id).is_some());
        assert_eq!(store.active_len(), 0);
        assert!(store.unregister(&id).is_none());
    }

    #[tokio::test]
    async fn test_cancel_owned_scope() {
        let store = JobStore::new(10);
        submit_one(&store, 1, "a.mp4", 100);
        submit_one(&store, 2, "b.mp4", 50);
        submit_one(&store, 1, "c.mp4", 25);

        // Owner 2's job becomes active; cancel must not touch it.
        let active = store.claim_next(0);
        // Head of the queue is owner 1's first job.
        let active = active.unwrap();
        assert_eq!(active.owner_id, 1);

        let outcome = store.cancel_owned(1).await;
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.freed_bytes, 25);
        assert_eq!(store.pending_len(), 1);
        assert_eq!(store.active_len(), 1);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.pending[0].owner_id, 2);
    }

    #[tokio::test]
    async fn test_cancel_owned_nothing_to_remove() {
        let store = JobStore::new(10);
        submit_one(&store, 2, "b.mp4", 50);
        let outcome = store.cancel_owned(1).await;
        assert_eq!(outcome.removed, 0);
        assert_eq!(outcome.freed_bytes, 0);
        assert_eq!(store.pending_len(), 1);
    }

    #[test]
    fn test_referenced_paths_cover_active_output() {
        let store = JobStore::new(10);
        let id = submit_one(&store, 1, "a.mp4", 10);
        store.claim_next(0).unwrap();
        store.set_output(&id, "/tmp/out/a.mp4");

        let paths = store.referenced_paths();
        assert!(paths.contains(&PathBuf::from("/vpress-test-missing/a.mp4")));
        assert!(paths.contains(&PathBuf::from("/tmp/out/a.mp4")));
    }

    #[test]
    fn test_snapshot_positions() {
        let store = JobStore::new(10);
        submit_one(&store, 1, "a.mp4", 10);
        submit_one(&store, 1, "b.mp4", 10);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.pending[0].position, 0);
        assert_eq!(snapshot.pending[1].position, 1);
    }
}
