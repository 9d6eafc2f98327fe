use thiserror::Error;

use crate::client::ClientError;

/// A failed send.
///
/// Every variant is treated the same by the worker: the attempt counts
/// toward the job's `max_tries` and is retried until that is exhausted.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Timed out during {stage}")]
    Timeout { stage: &'static str },

    #[error("Server rejected {stage}: {code} {message}")]
    Rejected {
        stage: &'static str,
        code: u16,
        message: String,
    },

    #[error("STARTTLS is required but {0} does not offer it")]
    TlsUnavailable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider rejected message: {status} {body}")]
    Provider { status: u16, body: String },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Unable to sign message: {0}")]
    Signing(#[from] courier_dkim::DkimError),

    #[error("Unable to load attachment {source_ref}: {reason}")]
    Attachment { source_ref: String, reason: String },
}

/// A transport that cannot be built from its configuration.
#[derive(Error, Debug)]
pub enum TransportConfigError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Port must be between 1 and 65535")]
    InvalidPort,

    #[error("A username was given without a password")]
    UsernameWithoutPassword,

    #[error("Invalid API endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Invalid DKIM configuration: {0}")]
    Dkim(#[from] courier_dkim::DkimError),

    #[error("Unable to build HTTP client: {0}")]
    HttpClient(String),
}

pub type Result<T, E = TransportError> = std::result::Result<T, E>;
