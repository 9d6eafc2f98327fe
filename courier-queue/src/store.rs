use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::{FailedJob, Job, JobId, MailPayload, Result};

/// Counts for one queue at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Jobs that can be reserved now.
    pub pending: usize,
    /// Jobs waiting for their `available_at`.
    pub delayed: usize,
    /// Jobs held by a worker (including expired leases not yet reclaimed).
    pub reserved: usize,
}

impl QueueStats {
    pub const fn total(&self) -> usize {
        self.pending + self.delayed + self.reserved
    }
}

/// Durable storage for queued jobs.
///
/// The store is the only synchronization point between producers, workers
/// and administrators: `reserve` must hand a given job to at most one caller
/// until it is acknowledged, released, failed, or its lease expires.
#[async_trait]
pub trait QueueStore: Send + Sync + std::fmt::Debug {
    /// How long a reservation stays exclusive. A worker must resolve a job
    /// well within this, or another worker will be handed the same job.
    fn lease(&self) -> Duration;

    /// Append a new job to `queue`, available immediately.
    async fn enqueue(&self, queue: &str, payload: MailPayload) -> Result<JobId>;

    /// Take the earliest available job from `queue`, incrementing its attempts.
    ///
    /// Reservations whose lease has expired are returned to the queue first.
    async fn reserve(&self, queue: &str) -> Result<Option<Job>>;

    /// Delete a job after successful processing. Unknown ids are ignored.
    async fn acknowledge(&self, id: &JobId) -> Result<()>;

    /// Return a reserved job to its queue, available after `delay`.
    async fn release(&self, id: &JobId, delay: Duration) -> Result<()>;

    /// Move a job to the failed collection.
    ///
    /// # Errors
    /// [`QueueError::JobNotFound`](crate::QueueError::JobNotFound) if the job
    /// no longer exists.
    async fn fail(&self, id: &JobId, reason: &str) -> Result<()>;

    /// Snapshot of the jobs in `queue`, pending and reserved, in reservation order.
    async fn list(&self, queue: &str) -> Result<Vec<Job>>;

    /// Snapshot of the failed collection, oldest failure first.
    async fn list_failed(&self) -> Result<Vec<FailedJob>>;

    /// Move one failed job back to its queue with zero attempts.
    ///
    /// Returns `false` when no failed record has that id.
    async fn retry(&self, id: &JobId) -> Result<bool>;

    /// Move every failed job back to its queue. Returns how many moved.
    async fn retry_all(&self) -> Result<usize>;

    /// Delete every job in `queue` (or in all queues), together with the
    /// failed records that came from it. Returns the number of entries removed.
    async fn purge(&self, queue: Option<&str>) -> Result<usize>;

    /// Delete the pending and reserved jobs of one queue.
    async fn clear(&self, queue: &str) -> Result<usize>;

    /// Empty the failed collection.
    async fn flush_failed(&self) -> Result<usize>;

    /// Names of every queue that has received a job.
    async fn queues(&self) -> Result<Vec<String>>;

    async fn stats(&self, queue: &str) -> Result<QueueStats>;

    /// Check the store is reachable.
    async fn ping(&self) -> Result<()>;
}
