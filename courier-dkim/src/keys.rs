use base64::prelude::*;
use rand_core::OsRng;
use rsa::{
    RsaPrivateKey, RsaPublicKey,
    pkcs1::DecodeRsaPublicKey,
    pkcs8::{DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding},
};

use crate::{DkimError, Result};

/// Default modulus size for generated keys.
pub const DEFAULT_KEY_BITS: usize = 2048;

const MIN_KEY_BITS: usize = 1024;
const MAX_KEY_BITS: usize = 4096;

/// A freshly generated RSA key pair in PEM form.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    /// PKCS#8 `PRIVATE KEY` PEM.
    pub private_key: String,
    /// SubjectPublicKeyInfo `PUBLIC KEY` PEM.
    pub public_key: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// The TXT record to publish at `<selector>._domainkey.<domain>`.
    ///
    /// # Errors
    /// Returns [`DkimError::InvalidKey`] if the public key does not parse.
    pub fn dns_record(&self) -> Result<String> {
        let der = parse_public_key(&self.public_key)?
            .to_public_key_der()
            .map_err(|e| DkimError::InvalidKey(e.to_string()))?;
        Ok(format!(
            "v=DKIM1; k=rsa; p={}",
            BASE64_STANDARD.encode(der.as_bytes())
        ))
    }
}

/// Generate a new RSA key pair of `bits` length.
///
/// # Errors
/// Returns [`DkimError::KeyGeneration`] if `bits` is outside 1024..=4096 or
/// the generator fails, and [`DkimError::InvalidKey`] if encoding fails.
pub fn generate_keys(bits: usize) -> Result<KeyPair> {
    if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&bits) {
        return Err(DkimError::KeyGeneration(format!(
            "key length must be between {MIN_KEY_BITS} and {MAX_KEY_BITS} bits, got {bits}"
        )));
    }

    let private = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| DkimError::KeyGeneration(e.to_string()))?;
    let public = RsaPublicKey::from(&private);

    let private_key = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| DkimError::InvalidKey(e.to_string()))?
        .to_string();
    let public_key = public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| DkimError::InvalidKey(e.to_string()))?;

    Ok(KeyPair {
        private_key,
        public_key,
    })
}

/// Parse an SPKI (`PUBLIC KEY`) or PKCS#1 (`RSA PUBLIC KEY`) PEM.
pub(crate) fn parse_public_key(pem: &str) -> Result<RsaPublicKey> {
    let pem = pem.trim();
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| DkimError::InvalidKey(e.to_string()))
}
