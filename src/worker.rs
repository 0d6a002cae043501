//! Queue worker around one [`Extractor`].
//!
//! The worker owns its extractor exclusively. Each collected batch is handed
//! to the blocking pool together with the extractor and comes back with it,
//! so forward passes never run on the async executor.

use crate::batcher::collect_batch;
use crate::extractor::Extractor;
use crate::types::{FeatureRecord, Job, QueueCfg};
use anyhow::Result;
use std::io::Write;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Runs until the job channel is closed.
pub async fn run_worker(extractor: Extractor, mut rx: mpsc::Receiver<Job>, queue: QueueCfg) -> Result<()> {
    let max_batch = queue.max_batch.min(extractor.batch_capacity());
    info!(
        "worker started: max_batch={}, max_wait_ms={}, mode={:?}",
        max_batch,
        queue.max_wait_ms,
        extractor.mode()
    );

    let mut extractor = extractor;
    while let Some(jobs) = collect_batch(&mut rx, max_batch, queue.max_wait_ms).await {
        extractor = tokio::task::spawn_blocking(move || {
            process_jobs(&mut extractor, jobs);
            extractor
        })
        .await?;
    }

    info!("job channel closed, worker stopping");
    Ok(())
}

/// Runs one collected batch and answers every job.
///
/// Jobs are grouped by image size first; a batch call needs all its images
/// at one size. Empty placeholder images form their own group.
pub fn process_jobs(extractor: &mut Extractor, jobs: Vec<Job>) {
    for group in group_by_size(jobs) {
        let capacity = extractor.batch_capacity();
        let mut group = group.into_iter().peekable();
        while group.peek().is_some() {
            let chunk: Vec<Job> = group.by_ref().take(capacity).collect();
            run_chunk(extractor, chunk);
        }
    }
}

fn run_chunk(extractor: &mut Extractor, chunk: Vec<Job>) {
    let (ids_images, replies): (Vec<_>, Vec<_>) = chunk
        .into_iter()
        .map(|job| ((job.id, job.image), job.reply))
        .unzip();
    let (ids, images): (Vec<_>, Vec<_>) = ids_images.into_iter().unzip();

    match extractor.apply_batch(&images) {
        Ok(table) => {
            debug!("extracted {} row(s) of dim {}", table.nrows(), table.ncols());
            for ((id, reply), row) in ids.into_iter().zip(replies).zip(table.outer_iter()) {
                let _ = reply.send(Ok(FeatureRecord::new(id, row.to_vec())));
            }
        }
        Err(e) => {
            warn!("batch of {} failed: {}", ids.len(), e);
            let message = e.to_string();
            for reply in replies {
                let _ = reply.send(Err(message.clone()));
            }
        }
    }
}

/// Partitions jobs by image size, keeping first-seen order inside and across groups.
fn group_by_size(jobs: Vec<Job>) -> Vec<Vec<Job>> {
    let mut groups: Vec<((usize, usize), Vec<Job>)> = Vec::new();
    for job in jobs {
        let size = if job.image.is_empty() { (0, 0) } else { job.image.size() };
        match groups.iter_mut().find(|(s, _)| *s == size) {
            Some((_, group)) => group.push(job),
            None => groups.push((size, vec![job])),
        }
    }
    groups.into_iter().map(|(_, group)| group).collect()
}

/// Writes one record as a JSON line.
pub fn write_record<W: Write>(out: &mut W, record: &FeatureRecord) -> Result<()> {
    serde_json::to_writer(&mut *out, record)?;
    out.write_all(b"\n")?;
    Ok(())
}
