use thiserror::Error;

/// DKIM configuration, key and signing errors.
///
/// None of these are retryable: a message that cannot be signed must not be
/// sent unsigned.
#[derive(Debug, Error)]
pub enum DkimError {
    /// The private or public key could not be parsed or encoded.
    #[error("Invalid DKIM key: {0}")]
    InvalidKey(String),

    /// A required configuration field is empty.
    #[error("Missing DKIM configuration field: {0}")]
    MissingField(&'static str),

    /// Reading the key file failed.
    #[error("Failed to read DKIM key file: {0}")]
    Io(#[from] std::io::Error),

    /// Key generation failed.
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// The RSA signing operation failed.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// A `DKIM-Signature` header could not be parsed.
    #[error("Malformed DKIM-Signature header: {0}")]
    MalformedSignature(String),
}

pub type Result<T> = std::result::Result<T, DkimError>;
