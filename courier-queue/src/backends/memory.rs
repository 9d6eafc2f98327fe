use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use courier_common::time::{duration_millis, now_millis};
use parking_lot::Mutex;

use crate::{
    FailedJob, Job, JobId, MailPayload, QueueConfig, QueueError, QueueStats, QueueStore, Result,
};

/// Ordering key for pending jobs: availability, then enqueue sequence.
type PendingKey = (u64, u64, JobId);

#[derive(Debug)]
struct Entry {
    job: Job,
    seq: u64,
    /// Lease expiry while reserved.
    lease_until: Option<u64>,
}

#[derive(Debug, Default)]
struct Inner {
    seq: u64,
    jobs: HashMap<JobId, Entry>,
    pending: HashMap<String, BTreeSet<PendingKey>>,
    failed: HashMap<JobId, FailedJob>,
    queues: BTreeSet<String>,
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn push_pending(&mut self, job: Job) {
        let seq = self.next_seq();
        self.pending
            .entry(job.queue.clone())
            .or_default()
            .insert((job.available_at, seq, job.id));
        self.queues.insert(job.queue.clone());
        self.jobs.insert(
            job.id,
            Entry {
                job,
                seq,
                lease_until: None,
            },
        );
    }

    /// Put reservations of `queue` whose lease ran out back into pending.
    fn reclaim_expired(&mut self, queue: &str, now: u64) {
        let pending = self.pending.entry(queue.to_string()).or_default();
        for entry in self.jobs.values_mut() {
            if entry.job.queue == queue && entry.lease_until.is_some_and(|until| until <= now) {
                entry.lease_until = None;
                entry.job.reserved_at = None;
                entry.job.available_at = now;
                pending.insert((now, entry.seq, entry.job.id));
            }
        }
    }

    /// Remove a job wherever it is. Returns the job if it existed.
    fn take(&mut self, id: &JobId) -> Option<Job> {
        let entry = self.jobs.remove(id)?;
        if let Some(pending) = self.pending.get_mut(&entry.job.queue) {
            pending.remove(&(entry.job.available_at, entry.seq, entry.job.id));
        }
        Some(entry.job)
    }

    fn ids_in(&self, queue: &str) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|entry| entry.job.queue == queue)
            .map(|entry| entry.job.id)
            .collect()
    }

    fn retry(&mut self, id: &JobId, now: u64) -> bool {
        let Some(failed) = self.failed.remove(id) else {
            return false;
        };
        let mut job = failed.job;
        job.reset(now);
        self.push_pending(job);
        true
    }
}

/// Process-local queue store.
///
/// Every operation runs inside one mutex critical section, which is what
/// makes `reserve` atomic across concurrent workers. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryQueueStore {
    inner: Arc<Mutex<Inner>>,
    lease: Duration,
}

impl MemoryQueueStore {
    /// Create an empty store with the default lease.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    #[must_use]
    pub fn with_config(config: QueueConfig) -> Self {
        Self::with_lease(config.lease())
    }

    /// Create an empty store whose reservations expire after `lease`.
    #[must_use]
    pub fn with_lease(lease: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            lease,
        }
    }

    /// Number of jobs held across all queues, excluding failed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    fn lease(&self) -> Duration {
        self.lease
    }

    async fn enqueue(&self, queue: &str, payload: MailPayload) -> Result<JobId> {
        let job = Job::new(queue, payload, now_millis());
        let id = job.id;
        self.inner.lock().push_pending(job);
        Ok(id)
    }

    async fn reserve(&self, queue: &str) -> Result<Option<Job>> {
        let now = now_millis();
        let lease_until = now.saturating_add(duration_millis(self.lease));
        let mut inner = self.inner.lock();
        inner.reclaim_expired(queue, now);

        let Some(pending) = inner.pending.get_mut(queue) else {
            return Ok(None);
        };
        let Some(&key) = pending.first().filter(|(available_at, ..)| *available_at <= now) else {
            return Ok(None);
        };
        pending.remove(&key);

        let Some(entry) = inner.jobs.get_mut(&key.2) else {
            return Err(QueueError::Corrupted {
                id: key.2.to_string(),
                reason: "pending entry without a job".to_string(),
            });
        };
        entry.job.attempts = entry.job.attempts.saturating_add(1);
        entry.job.reserved_at = Some(now);
        entry.lease_until = Some(lease_until);
        Ok(Some(entry.job.clone()))
    }

    async fn acknowledge(&self, id: &JobId) -> Result<()> {
        self.inner.lock().take(id);
        Ok(())
    }

    async fn release(&self, id: &JobId, delay: Duration) -> Result<()> {
        let available_at = now_millis().saturating_add(duration_millis(delay));
        let mut inner = self.inner.lock();
        let Some(mut job) = inner.take(id) else {
            return Err(QueueError::JobNotFound(*id));
        };
        job.available_at = available_at;
        job.reserved_at = None;
        inner.push_pending(job);
        Ok(())
    }

    async fn fail(&self, id: &JobId, reason: &str) -> Result<()> {
        let now = now_millis();
        let mut inner = self.inner.lock();
        let Some(job) = inner.take(id) else {
            return Err(QueueError::JobNotFound(*id));
        };
        inner.failed.insert(*id, FailedJob::new(job, reason, now));
        Ok(())
    }

    async fn list(&self, queue: &str) -> Result<Vec<Job>> {
        let inner = self.inner.lock();
        let mut jobs: Vec<&Entry> = inner
            .jobs
            .values()
            .filter(|entry| entry.job.queue == queue)
            .collect();
        jobs.sort_by_key(|entry| {
            (
                entry.lease_until.is_some(),
                entry.lease_until.unwrap_or(entry.job.available_at),
                entry.seq,
            )
        });
        Ok(jobs.into_iter().map(|entry| entry.job.clone()).collect())
    }

    async fn list_failed(&self) -> Result<Vec<FailedJob>> {
        let inner = self.inner.lock();
        let mut failed: Vec<FailedJob> = inner.failed.values().cloned().collect();
        failed.sort_by_key(|record| (record.failed_at, record.id()));
        Ok(failed)
    }

    async fn retry(&self, id: &JobId) -> Result<bool> {
        Ok(self.inner.lock().retry(id, now_millis()))
    }

    async fn retry_all(&self) -> Result<usize> {
        let now = now_millis();
        let mut inner = self.inner.lock();
        let mut ids: Vec<(u64, JobId)> = inner
            .failed
            .values()
            .map(|record| (record.failed_at, record.id()))
            .collect();
        ids.sort_unstable();
        Ok(ids
            .into_iter()
            .filter(|(_, id)| inner.retry(id, now))
            .count())
    }

    async fn purge(&self, queue: Option<&str>) -> Result<usize> {
        let mut inner = self.inner.lock();
        let Some(queue) = queue else {
            let removed = inner.jobs.len() + inner.failed.len();
            *inner = Inner {
                seq: inner.seq,
                ..Inner::default()
            };
            return Ok(removed);
        };

        let mut removed = 0;
        for id in inner.ids_in(queue) {
            inner.take(&id);
            removed += 1;
        }
        let before = inner.failed.len();
        inner.failed.retain(|_, record| record.job.queue != queue);
        removed += before - inner.failed.len();
        inner.pending.remove(queue);
        inner.queues.remove(queue);
        Ok(removed)
    }

    async fn clear(&self, queue: &str) -> Result<usize> {
        let mut inner = self.inner.lock();
        let ids = inner.ids_in(queue);
        for id in &ids {
            inner.take(id);
        }
        Ok(ids.len())
    }

    async fn flush_failed(&self) -> Result<usize> {
        let mut inner = self.inner.lock();
        let removed = inner.failed.len();
        inner.failed.clear();
        Ok(removed)
    }

    async fn queues(&self) -> Result<Vec<String>> {
        Ok(self.inner.lock().queues.iter().cloned().collect())
    }

    async fn stats(&self, queue: &str) -> Result<QueueStats> {
        let now = now_millis();
        let inner = self.inner.lock();
        let mut stats = QueueStats::default();
        for entry in inner.jobs.values().filter(|entry| entry.job.queue == queue) {
            if entry.lease_until.is_some() {
                stats.reserved += 1;
            } else if entry.job.available_at <= now {
                stats.pending += 1;
            } else {
                stats.delayed += 1;
            }
        }
        Ok(stats)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
