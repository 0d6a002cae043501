use crate::types::Job;
use tokio::sync::mpsc;
use tokio::time::{self, Duration};

/// Collects queued jobs into one batch.
/// - Waits for at least one job.
/// - Keeps collecting until `max_batch` jobs or `max_wait_ms` elapsed.
/// - Returns `None` once the channel is closed and drained.
///
/// No padding: the extractor zero-fills unused batch slots itself.
pub async fn collect_batch(
    rx: &mut mpsc::Receiver<Job>,
    max_batch: usize,
    max_wait_ms: u64,
) -> Option<Vec<Job>> {
    let max_batch = max_batch.max(1);
    let first = rx.recv().await?;
    let mut jobs = Vec::with_capacity(max_batch.min(64));
    jobs.push(first);

    let timer = time::sleep(Duration::from_millis(max_wait_ms));
    tokio::pin!(timer);

    while jobs.len() < max_batch {
        tokio::select! {
            biased;
            _ = &mut timer => break,
            maybe_job = rx.recv() => match maybe_job {
                Some(job) => jobs.push(job),
                None => break,
            },
        }
    }

    Some(jobs)
}
