use tokio::sync::mpsc;

use crate::job::JobId;

/// One progress observation from the transcoder's output stream.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub job_id: JobId,
    pub percent: u8,
}

/// Non-blocking progress handle handed to the invoker.
///
/// `report` uses `try_send` so the subprocess output pump is never stalled by
/// a slow consumer; dropped updates are fine because later values supersede
/// earlier ones.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ProgressReporter {
    pub fn new(job_id: impl Into<JobId>, tx: mpsc::Sender<ProgressUpdate>) -> Self {
        Self {
            job_id: job_id.into(),
            tx,
        }
    }

    /// A reporter whose updates go nowhere, for tests and probes.
    pub fn noop(job_id: impl Into<JobId>) -> Self {
        let (tx, _rx) = mpsc::channel::<ProgressUpdate>(1);
        Self::new(job_id, tx)
    }

    pub fn report(&self, percent: u8) {
        let _ = self.tx.try_send(ProgressUpdate {
            job_id: self.job_id.clone(),
            percent,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_report_delivers_update() {
        let (tx, mut rx) = mpsc::channel(8);
        let reporter = ProgressReporter::new("job-1", tx);
        reporter.report(42);

        let update = rx.recv().await.unwrap();
        assert_eq!(update.job_id, "job-1");
        assert_eq!(update.percent, 42);
    }

    #[test]
    fn test_report_never_blocks_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        let reporter = ProgressReporter::new("job-1", tx);
        // Second send would block a plain `send`; `try_send` drops it instead.
        reporter.report(1);
        reporter.report(2);
    }

    #[test]
    fn test_noop_reporter() {
        let reporter = ProgressReporter::noop("job-1");
        reporter.report(50);
    }
}
