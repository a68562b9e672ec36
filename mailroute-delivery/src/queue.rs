//! The external queue jobs are consumed from
//!
//! Popping removes the payload from the queue, so a job is handed out at
//! most once. Anything that goes wrong afterwards loses the job.

use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use redis::{AsyncCommands, aio::MultiplexedConnection};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue service error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Queue closed")]
    Closed,
}

/// Source of serialized job payloads.
#[async_trait]
pub trait JobSource: Send + Sync + Debug {
    /// Waits a bounded time for the next payload.
    ///
    /// Returns `None` when nothing arrived in time. Callers poll again, and
    /// must not drop the future once it has started: a payload taken off the
    /// queue would be lost with it.
    ///
    /// # Errors
    ///
    /// [`QueueError::Closed`] when no payload will ever arrive again, or the
    /// backend's error when the queue cannot be reached.
    async fn pop(&self) -> Result<Option<String>, QueueError>;
}

/// Pops payloads from a Redis list with `BLPOP <queue> <timeout>`.
///
/// The connection should not be shared with anything else: it sits blocked
/// inside `BLPOP` while the queue is empty.
#[derive(Clone)]
pub struct RedisJobSource {
    connection: MultiplexedConnection,
    queue: String,
    timeout: Duration,
}

impl RedisJobSource {
    /// A zero `timeout` is raised to one second, since `BLPOP` reads zero
    /// as "block forever".
    #[must_use]
    pub fn new(
        connection: MultiplexedConnection,
        queue: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            connection,
            queue: queue.into(),
            timeout: timeout.max(Duration::from_secs(1)),
        }
    }
}

impl Debug for RedisJobSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisJobSource")
            .field("queue", &self.queue)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl JobSource for RedisJobSource {
    async fn pop(&self) -> Result<Option<String>, QueueError> {
        let mut connection = self.connection.clone();

        let popped: Option<(String, String)> = connection
            .blpop(&self.queue, self.timeout.as_secs_f64())
            .await?;

        Ok(popped.map(|(_, payload)| payload))
    }
}
