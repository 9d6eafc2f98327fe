//! Error types for administrative operations

use courier_queue::{JobId, QueueError};
use thiserror::Error;

/// Errors that can occur during administrative operations
#[derive(Debug, Error)]
pub enum ControlError {
    /// The queue store failed or rejected the request
    #[error(transparent)]
    Store(#[from] QueueError),

    /// No failed record has this id
    #[error("No failed job with id {0}")]
    UnknownFailedJob(JobId),
}

/// Result type for administrative operations
pub type Result<T> = std::result::Result<T, ControlError>;
