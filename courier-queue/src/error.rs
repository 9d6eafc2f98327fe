//! Error types for the courier-queue crate.

use std::time::Duration;

use thiserror::Error;

use crate::JobId;

/// Queue store error type.
///
/// Connectivity and timeout failures are transient: the worker backs off and
/// tries again. Everything else points at bad data or a caller mistake.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The store could not be reached, or a command failed on the wire.
    #[error("Store connection error: {0}")]
    Connection(String),

    /// The store did not answer within the configured timeout.
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// A job could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored job is missing fields or holds unparsable values.
    #[error("Corrupted job {id}: {reason}")]
    Corrupted { id: String, reason: String },

    /// The job does not exist (never enqueued, or already resolved).
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// A job id supplied by a caller is not a valid ULID.
    #[error("Invalid job id: {0}")]
    InvalidId(String),

    /// Invalid queue configuration.
    #[error("Invalid queue configuration: {0}")]
    Configuration(String),
}

impl QueueError {
    /// Returns `true` if retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(error: redis::RedisError) -> Self {
        Self::Connection(error.to_string())
    }
}

impl From<deadpool_redis::PoolError> for QueueError {
    fn from(error: deadpool_redis::PoolError) -> Self {
        Self::Connection(format!("Failed to get store connection: {error}"))
    }
}

/// Specialized `Result` type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
