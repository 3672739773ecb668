//! Batch dispatchers.
//!
//! Resolvers schedule batched loads on the operation's dispatcher. The
//! executor drains the dispatcher once a level of fields has been resolved.

use async_trait::async_trait;
use crossbeam_queue::SegQueue;
use futures_util::future::{join_all, BoxFuture};
use std::fmt;

/// A unit of batched work.
pub type BatchJob = BoxFuture<'static, ()>;

/// Coordinates batched loads for one operation.
#[async_trait]
pub trait BatchDispatcher: Send + Sync {
    /// Schedules work.
    fn schedule(&self, job: BatchJob);

    /// Runs scheduled work to completion, including work scheduled while
    /// dispatching.
    async fn dispatch(&self);

    /// Number of jobs waiting for dispatch.
    fn pending(&self) -> usize;
}

/// Runs scheduled work immediately on the tokio runtime.
///
/// Used where no batching scope exists, e.g. when the source stream of a
/// subscription is created.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBatchDispatcher;

#[async_trait]
impl BatchDispatcher for NoopBatchDispatcher {
    fn schedule(&self, job: BatchJob) {
        tokio::spawn(job);
    }

    async fn dispatch(&self) {}

    fn pending(&self) -> usize {
        0
    }
}

/// Queues work until [`BatchDispatcher::dispatch`] is called.
#[derive(Default)]
pub struct QueuedBatchDispatcher {
    queue: SegQueue<BatchJob>,
}

impl QueuedBatchDispatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BatchDispatcher for QueuedBatchDispatcher {
    fn schedule(&self, job: BatchJob) {
        self.queue.push(job);
    }

    async fn dispatch(&self) {
        loop {
            let mut batch = Vec::with_capacity(self.queue.len());
            while let Some(job) = self.queue.pop() {
                batch.push(job);
            }
            if batch.is_empty() {
                break;
            }
            tracing::trace!(jobs = batch.len(), "dispatching batch");
            join_all(batch).await;
        }
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl fmt::Debug for QueuedBatchDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedBatchDispatcher")
            .field("pending", &self.queue.len())
            .finish()
    }
}
