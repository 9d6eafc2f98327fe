//! The worker loop: reserve, execute, resolve.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use courier_common::{
    EventSink, MailEvent, Signal, WorkerConfig, internal, time::duration_millis,
};
use courier_queue::{Job, JobId, QueueStore};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, error, warn};

use crate::{
    JobHandler, JobOutcome, MemoryGauge, ProcessMemory, RetryPolicy,
    error::{Result, WorkerError},
};

/// Attempts made at acknowledging, releasing or failing a job before giving
/// up and leaving it to lease expiry.
const RESOLVE_ATTEMPTS: u32 = 5;
const RESOLVE_BACKOFF: Duration = Duration::from_millis(100);

/// Time spent sleeping between resolution attempts when every one fails.
const RESOLVE_BUDGET: Duration =
    Duration::from_millis(100 * ((1 << (RESOLVE_ATTEMPTS - 1)) - 1));

/// The shortest reservation lease a worker with `config` can run under.
///
/// A lease no longer than this could expire while a job is still executing
/// or being resolved, and another worker would then run the same job.
pub fn minimum_lease(config: &WorkerConfig) -> Duration {
    config.timeout() + RESOLVE_BUDGET
}

/// Queue polled when none are configured explicitly.
pub const DEFAULT_QUEUE: &str = "default";

/// How a processed job left the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Acknowledged,
    Released { delay: Duration },
    Failed { reason: String },
}

/// Summary of one iteration that found a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedJob {
    pub id: JobId,
    pub queue: String,
    /// Attempt number of the execution that just finished.
    pub attempts: u32,
    pub resolution: Resolution,
}

/// Why [`Worker::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// A stop was requested.
    Stopped,
    /// Resident memory passed the configured limit.
    MemoryExceeded { used_bytes: u64, limit_bytes: u64 },
}

/// Polls one or more queues and runs their jobs through a [`JobHandler`].
///
/// Any number of workers, in one process or many, may share a store; the
/// store's atomic reservation keeps them from running the same job twice.
pub struct Worker {
    store: Arc<dyn QueueStore>,
    handler: Arc<dyn JobHandler>,
    events: Arc<dyn EventSink>,
    config: WorkerConfig,
    queues: Vec<String>,
    retry: RetryPolicy,
    memory: Arc<dyn MemoryGauge>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("store", &self.store)
            .field("config", &self.config)
            .field("queues", &self.queues)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Worker {
    pub fn new(
        store: Arc<dyn QueueStore>,
        handler: Arc<dyn JobHandler>,
        events: Arc<dyn EventSink>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            handler,
            events,
            config,
            queues: vec![DEFAULT_QUEUE.to_string()],
            retry: RetryPolicy::default(),
            memory: Arc::new(ProcessMemory),
        }
    }

    /// Queues to poll, highest priority first.
    #[must_use]
    pub fn with_queues(mut self, queues: Vec<String>) -> Self {
        self.queues = queues;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_memory_gauge(mut self, memory: Arc<dyn MemoryGauge>) -> Self {
        self.memory = memory;
        self
    }

    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    /// Run until a stop is requested on `shutdown` or memory runs over the limit.
    ///
    /// Stop requests and the memory limit are checked before each
    /// reservation; a job already reserved is always finished and resolved.
    /// Store errors are logged and backed off, never returned.
    ///
    /// # Errors
    /// [`WorkerError::NoQueues`] if there is nothing to poll, or
    /// [`WorkerError::LeaseTooShort`] if the store's lease could expire
    /// before a job times out and is resolved.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<Signal>) -> Result<WorkerExit> {
        self.check_setup()?;

        internal!(
            level = INFO,
            "Worker polling {} (max_tries: {}, timeout: {:?}, memory: {}MB)",
            self.queues.join(", "),
            self.config.max_tries(),
            self.config.timeout(),
            self.config.memory_mb()
        );

        loop {
            if stop_requested(&mut shutdown) {
                internal!(level = INFO, "Worker received shutdown signal");
                return Ok(WorkerExit::Stopped);
            }

            if let Some(exit) = self.memory_exceeded() {
                return Ok(exit);
            }

            let pause = match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => self.config.sleep(),
                Err(err) => {
                    error!(error = %err, "Worker iteration failed, backing off");
                    self.config.sleep().max(RESOLVE_BACKOFF)
                }
            };

            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!(level = INFO, "Worker received shutdown signal");
                        }
                        Err(err) => {
                            warn!("Worker shutdown channel error: {err}");
                        }
                    }
                    return Ok(WorkerExit::Stopped);
                }
            }
        }
    }

    /// Reserve and process at most one job.
    ///
    /// Returns `Ok(None)` when every queue is empty.
    ///
    /// # Errors
    /// The setup errors of [`Worker::run`], a store error from reserving, or from resolving the job once the
    /// bounded retries are used up. In the latter case the job stays reserved
    /// until its lease expires and is then handed out again.
    pub async fn run_once(&self) -> Result<Option<ProcessedJob>> {
        self.check_setup()?;

        let Some(job) = self.reserve().await? else {
            return Ok(None);
        };

        debug!(
            job_id = %job.id,
            queue = %job.queue,
            attempts = job.attempts,
            "Reserved job"
        );

        let started = Instant::now();
        let timeout = self.config.timeout();
        let outcome = tokio::time::timeout(timeout, self.handler.handle(&job))
            .await
            .unwrap_or_else(|_| {
                JobOutcome::Retry(format!("Job exceeded the {}s timeout", timeout.as_secs()))
            });
        let elapsed = started.elapsed();

        let resolution = self.resolve(&job, outcome, elapsed).await?;

        Ok(Some(ProcessedJob {
            id: job.id,
            queue: job.queue,
            attempts: job.attempts,
            resolution,
        }))
    }

    fn check_setup(&self) -> Result<()> {
        if self.queues.is_empty() {
            return Err(WorkerError::NoQueues);
        }

        let lease = self.store.lease();
        let required = minimum_lease(&self.config);
        if lease <= required {
            return Err(WorkerError::LeaseTooShort { lease, required });
        }

        Ok(())
    }

    async fn reserve(&self) -> Result<Option<Job>> {
        for queue in &self.queues {
            if let Some(job) = self.store.reserve(queue).await? {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    async fn resolve(&self, job: &Job, outcome: JobOutcome, elapsed: Duration) -> Result<Resolution> {
        let id = &job.id;

        match outcome {
            JobOutcome::Success => {
                with_retries("acknowledge", id, move || self.store.acknowledge(id))
                    .await?;
                self.events.emit(&MailEvent::Sent {
                    job_id: id.to_string(),
                    queue: job.queue.clone(),
                    to: job.payload.to.clone(),
                    subject: job.payload.subject.clone(),
                    attempts: job.attempts,
                    duration_ms: duration_millis(elapsed),
                });
                Ok(Resolution::Acknowledged)
            }
            JobOutcome::Retry(reason) if job.attempts < self.config.max_tries() => {
                let delay = self.retry.delay_for(job.attempts);
                with_retries("release", id, move || self.store.release(id, delay))
                    .await?;
                self.events.emit(&failed_event(job, reason, true));
                self.events.emit(&MailEvent::Queued {
                    job_id: id.to_string(),
                    queue: job.queue.clone(),
                    to: job.payload.to.clone(),
                    subject: job.payload.subject.clone(),
                    attempts: job.attempts,
                    delay_ms: duration_millis(delay),
                });
                Ok(Resolution::Released { delay })
            }
            JobOutcome::Retry(reason) | JobOutcome::Fail(reason) => {
                let exception = reason.as_str();
                with_retries("fail", id, move || self.store.fail(id, exception))
                    .await?;
                self.events.emit(&failed_event(job, reason.clone(), false));
                Ok(Resolution::Failed { reason })
            }
        }
    }

    fn memory_exceeded(&self) -> Option<WorkerExit> {
        let limit_bytes = self.config.memory_bytes();
        let used_bytes = self.memory.resident_bytes()?;

        (used_bytes > limit_bytes).then(|| {
            internal!(
                level = WARN,
                "Worker memory {}MB reached the {}MB limit, exiting",
                used_bytes / (1024 * 1024),
                self.config.memory_mb()
            );
            WorkerExit::MemoryExceeded {
                used_bytes,
                limit_bytes,
            }
        })
    }
}

fn failed_event(job: &Job, error: String, will_retry: bool) -> MailEvent {
    MailEvent::Failed {
        job_id: job.id.to_string(),
        queue: job.queue.clone(),
        to: job.payload.to.clone(),
        subject: job.payload.subject.clone(),
        attempts: job.attempts,
        error,
        will_retry,
    }
}

/// Run a resolution step, retrying transient store errors with a doubling
/// back-off.
async fn with_retries<F, Fut>(action: &'static str, id: &JobId, op: F) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = courier_queue::Result<()>>,
{
    let mut backoff = RESOLVE_BACKOFF;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_temporary() && attempt < RESOLVE_ATTEMPTS => {
                warn!(
                    job_id = %id,
                    attempt,
                    error = %err,
                    "Unable to {action} job, retrying in {backoff:?}"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(err) => {
                error!(
                    job_id = %id,
                    error = %err,
                    "Unable to {action} job, leaving it for lease expiry"
                );
                return Err(err.into());
            }
        }
    }
}

/// Whether a stop has been requested since the last check.
///
/// A closed or lagged channel counts as a stop: the only thing ever sent is
/// a stop request.
fn stop_requested(shutdown: &mut broadcast::Receiver<Signal>) -> bool {
    match shutdown.try_recv() {
        Ok(Signal::Shutdown | Signal::Finalised)
        | Err(TryRecvError::Closed | TryRecvError::Lagged(_)) => true,
        Err(TryRecvError::Empty) => false,
    }
}
