//! The worker loop: take one job, run it to completion, repeat

use std::sync::Arc;

use mailroute_common::{EmailJob, internal, tracing};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::DispatcherStats;
use crate::pipeline::JobPipeline;

/// Runs until the channel is closed and empty.
pub(super) async fn run(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<EmailJob>>>,
    pipeline: Arc<JobPipeline>,
    stats: Arc<DispatcherStats>,
    cancel: CancellationToken,
) {
    tracing::trace!("Worker {id} started");

    loop {
        // The lock is only held while waiting for the next job
        let next = receiver.lock().await.recv().await;
        let Some(job) = next else {
            break;
        };

        if cancel.is_cancelled() {
            internal!(
                level = WARN,
                "Worker {id} discarding job from {} to {} recipient(s): shutting down",
                job.from,
                job.to.len()
            );
            DispatcherStats::bump(&stats.discarded);
            continue;
        }

        // A panicking job ends only its own task
        let from = job.from.clone();
        let task = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            let cancel = cancel.clone();
            async move { pipeline.process(&job, &cancel).await }
        });

        match task.await {
            Ok(summary) => {
                tracing::debug!("Worker {id} finished job from {from}: {summary:?}");
                DispatcherStats::bump(&stats.processed);
            }
            Err(e) => {
                tracing::error!("Worker {id} abandoned job from {from}: {e}");
                DispatcherStats::bump(&stats.aborted);
            }
        }
    }

    tracing::trace!("Worker {id} stopped");
}
