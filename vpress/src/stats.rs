//! Cumulative statistics over completed jobs.

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Default)]
struct StatsInner {
    jobs_completed: u64,
    jobs_failed: u64,
    original_bytes: u64,
    compressed_bytes: u64,
}

/// Read-only copy of the aggregated stats.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    /// Cumulative compression ratio, `original / compressed` over all
    /// completed jobs. `None` until the first completion.
    pub average_ratio: Option<f64>,
}

/// Accumulates counts, byte totals, and the compression-ratio average.
///
/// Only the worker pool's reporting step mutates this; everything else reads
/// snapshots.
#[derive(Default)]
pub struct StatsAggregator {
    inner: Mutex<StatsInner>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful job with its original and compressed sizes.
    pub fn record_success(&self, original_bytes: u64, compressed_bytes: u64) {
        let mut inner = self.inner.lock();
        inner.jobs_completed += 1;
        inner.original_bytes += original_bytes;
        inner.compressed_bytes += compressed_bytes;
    }

    /// Record a failed job. Byte totals and the ratio are unaffected.
    pub fn record_failure(&self) {
        self.inner.lock().jobs_failed += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock();
        let average_ratio = if inner.compressed_bytes > 0 {
            Some(inner.original_bytes as f64 / inner.compressed_bytes as f64)
        } else {
            None
        };
        StatsSnapshot {
            jobs_completed: inner.jobs_completed,
            jobs_failed: inner.jobs_failed,
            original_bytes: inner.original_bytes,
            compressed_bytes: inner.compressed_bytes,
            average_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let stats = StatsAggregator::new();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.jobs_completed, 0);
        assert_eq!(snapshot.jobs_failed, 0);
        assert!(snapshot.average_ratio.is_none());
    }

    #[test]
    fn test_record_success_updates_totals() {
        let stats = StatsAggregator::new();
        stats.record_success(100 * 1024 * 1024, 45 * 1024 * 1024);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.jobs_completed, 1);
        assert_eq!(snapshot.original_bytes, 100 * 1024 * 1024);
        assert_eq!(snapshot.compressed_bytes, 45 * 1024 * 1024);
        let ratio = snapshot.average_ratio.unwrap();
        assert!((ratio - 100.0 / 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_average_is_cumulative_mean() {
        let stats = StatsAggregator::new();
        stats.record_success(1000, 500);
        stats.record_success(3000, 1000);

        // 4000 / 1500, not the pairwise smoothing of per-job ratios.
        let ratio = stats.snapshot().average_ratio.unwrap();
        assert!((ratio - 4000.0 / 1500.0).abs() < 1e-9);
    }

    #[test]
    fn test_failures_do_not_touch_ratio() {
        let stats = StatsAggregator::new();
        stats.record_success(1000, 500);
        stats.record_failure();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.jobs_failed, 1);
        assert_eq!(snapshot.jobs_completed, 1);
        assert!((snapshot.average_ratio.unwrap() - 2.0).abs() < 1e-9);
    }
}
