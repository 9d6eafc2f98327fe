//! Validated configuration shared between producers, workers and the CLI.
//!
//! Both types are checked eagerly: constructing (or deserializing) an invalid
//! value fails with a [`ConfigError`] naming the offending field.
//!
//! - [`connection`]: how to reach the key-value store
//! - [`worker`]: poll interval, retry budget, memory and time limits

pub mod connection;
pub mod worker;

use thiserror::Error;

pub use connection::ConnectionConfig;
pub use worker::WorkerConfig;

/// Errors raised while validating configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required field is missing or empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A field is present but outside its allowed range.
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}
