use std::time::Duration;

use courier_common::ConfigError;
use courier_queue::QueueError;
use thiserror::Error;

/// Problems that stop a worker from running at all.
///
/// A failing job is never a `WorkerError`; it is released or failed in the
/// store and the loop carries on.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Worker has no queues to poll")]
    NoQueues,

    #[error(
        "Queue lease of {lease:?} must be longer than the job timeout plus resolution retries ({required:?})"
    )]
    LeaseTooShort { lease: Duration, required: Duration },

    #[error("Invalid worker configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue store error: {0}")]
    Store(#[from] QueueError),
}

pub type Result<T, E = WorkerError> = std::result::Result<T, E>;
