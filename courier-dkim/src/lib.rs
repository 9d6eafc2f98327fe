//! DKIM signatures for outgoing mail.
//!
//! Signatures use `rsa-sha256` with `relaxed/relaxed` canonicalization. A
//! [`DkimSigner`] is built from a [`DkimConfig`] and produces the complete
//! `DKIM-Signature` header line to prepend to a message; [`verify`] checks
//! one against a public key.

pub mod canonicalize;
pub mod config;
pub mod error;
pub mod keys;
pub mod signer;

pub use config::{DkimConfig, should_sign};
pub use error::{DkimError, Result};
pub use keys::{DEFAULT_KEY_BITS, KeyPair, generate_keys};
pub use signer::{DkimSigner, verify};
