//! Job dispatcher orchestration
//!
//! A single consumer loop pops payloads from the external queue, decodes them
//! and offers them to a bounded internal channel without ever waiting for
//! room. A fixed pool of workers drains that channel, each running one job
//! through the [`JobPipeline`] at a time.

mod worker;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use mailroute_common::{EmailJob, internal, tracing};
use serde::Deserialize;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

use crate::{
    pipeline::JobPipeline,
    queue::{JobSource, QueueError},
};

fn default_queue_name() -> String {
    "OUTGOING_MAILS".to_string()
}

const fn default_capacity() -> usize {
    1000
}

const fn default_backoff_ms() -> u64 {
    1000
}

const fn default_poll_secs() -> u64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// Name of the list jobs are popped from (default: `OUTGOING_MAILS`)
    #[serde(default = "default_queue_name")]
    pub name: String,

    /// Jobs that may wait for a worker before new ones are dropped (default: 1000)
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Number of workers (default: one per CPU)
    #[serde(default)]
    pub workers: Option<usize>,

    /// Pause after a failed pop before trying again, in milliseconds (default: 1000)
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Longest a single pop waits for a job, in seconds (default: 1)
    ///
    /// Shutdown is noticed between pops, so this bounds how long it takes.
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            capacity: default_capacity(),
            workers: None,
            backoff_ms: default_backoff_ms(),
            poll_secs: default_poll_secs(),
        }
    }
}

impl DispatcherConfig {
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }

    #[must_use]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_secs.max(1))
    }
}

/// Running totals kept by a dispatcher and its workers.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    received: AtomicU64,
    malformed: AtomicU64,
    dropped: AtomicU64,
    queued: AtomicU64,
    processed: AtomicU64,
    discarded: AtomicU64,
    aborted: AtomicU64,
}

/// A point-in-time copy of [`DispatcherStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Payloads popped from the external queue.
    pub received: u64,
    /// Payloads that did not decode into a job.
    pub malformed: u64,
    /// Jobs dropped because the internal queue was full.
    pub dropped: u64,
    /// Jobs handed to the worker pool.
    pub queued: u64,
    /// Jobs a worker ran to completion.
    pub processed: u64,
    /// Queued jobs thrown away because shutdown was requested.
    pub discarded: u64,
    /// Jobs whose processing panicked.
    pub aborted: u64,
}

impl DispatcherStats {
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// What happened to a job offered to the internal queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    Dropped,
}

/// Offers `job` to the internal queue without waiting for room.
///
/// A full (or closed) queue drops the job with a local diagnostic.
pub fn admit(sender: &mpsc::Sender<EmailJob>, job: EmailJob) -> Admission {
    match sender.try_send(job) {
        Ok(()) => Admission::Queued,
        Err(mpsc::error::TrySendError::Full(job)) => {
            internal!(
                level = WARN,
                "queue full, dropping job from {} to {} recipient(s)",
                job.from,
                job.to.len()
            );
            Admission::Dropped
        }
        Err(mpsc::error::TrySendError::Closed(job)) => {
            internal!(
                level = WARN,
                "queue closed, dropping job from {}",
                job.from
            );
            Admission::Dropped
        }
    }
}

/// Consumes the external queue and feeds the worker pool.
#[derive(Debug)]
pub struct Dispatcher {
    source: Arc<dyn JobSource>,
    pipeline: Arc<JobPipeline>,
    config: DispatcherConfig,
    stats: Arc<DispatcherStats>,
    cancel: CancellationToken,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        source: Arc<dyn JobSource>,
        pipeline: JobPipeline,
        config: DispatcherConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            pipeline: Arc::new(pipeline),
            config,
            stats: Arc::new(DispatcherStats::default()),
            cancel,
        }
    }

    /// Shared handle to the counters, readable while [`Self::run`] is going.
    #[must_use]
    pub fn stats(&self) -> Arc<DispatcherStats> {
        Arc::clone(&self.stats)
    }

    /// Runs until the token is cancelled or the source closes, then waits
    /// for every worker to finish.
    ///
    /// Jobs still waiting in the internal queue at cancellation are
    /// discarded, not delivered.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn run(self) -> StatsSnapshot {
        let workers = self.config.worker_count();
        internal!(
            level = INFO,
            "Dispatcher starting on '{}' with {workers} workers and capacity {}",
            self.config.name,
            self.config.capacity
        );

        let (sender, receiver) = mpsc::channel(self.config.capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let mut pool = JoinSet::new();
        for id in 0..workers {
            pool.spawn(worker::run(
                id,
                Arc::clone(&receiver),
                Arc::clone(&self.pipeline),
                Arc::clone(&self.stats),
                self.cancel.clone(),
            ));
        }

        self.consume(&sender).await;

        // Closing the channel lets the workers drain and exit
        drop(sender);
        while let Some(result) = pool.join_next().await {
            if let Err(e) = result {
                tracing::error!("Worker terminated abnormally: {e}");
            }
        }

        let stats = self.stats.snapshot();
        internal!(level = INFO, "Dispatcher stopped: {stats:?}");
        stats
    }

    async fn consume(&self, sender: &mpsc::Sender<EmailJob>) {
        let backoff = Duration::from_millis(self.config.backoff_ms);

        // A pop is never abandoned part way: the payload may already be off
        // the queue. Sources return empty-handed often enough to see the token.
        while !self.cancel.is_cancelled() {
            match self.source.pop().await {
                Ok(Some(payload)) => {
                    self.offer(sender, &payload);
                }
                Ok(None) => {}
                Err(QueueError::Closed) => {
                    internal!(level = INFO, "Job source closed");
                    break;
                }
                Err(e) => {
                    tracing::error!("Unable to fetch job, retrying in {backoff:?}: {e}");
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }

    /// Decodes `payload` and offers it to the workers.
    ///
    /// Returns `None` for a payload that is not a valid job.
    fn offer(&self, sender: &mpsc::Sender<EmailJob>, payload: &str) -> Option<Admission> {
        DispatcherStats::bump(&self.stats.received);

        let job = match EmailJob::decode(payload) {
            Ok(job) => job,
            Err(e) => {
                internal!(level = WARN, "Skipping malformed job: {e}");
                DispatcherStats::bump(&self.stats.malformed);
                return None;
            }
        };

        let admission = admit(sender, job);
        match admission {
            Admission::Queued => DispatcherStats::bump(&self.stats.queued),
            Admission::Dropped => DispatcherStats::bump(&self.stats.dropped),
        }

        Some(admission)
    }
}
