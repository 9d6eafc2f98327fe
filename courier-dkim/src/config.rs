use std::{fmt, path::PathBuf};

use courier_common::TransportKind;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Signing identity and key material.
///
/// ```ron
/// dkim: (
///     private_key_path: "/etc/courier/dkim.pem",
///     selector: "mail",
///     domain: "example.com",
/// )
/// ```
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkimConfig {
    /// PEM encoded RSA private key (PKCS#1 or PKCS#8).
    #[serde(default)]
    pub private_key: String,
    /// File to read the private key from when `private_key` is empty.
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub domain: String,
    /// Header names to sign, in signing order.
    #[serde(default = "defaults::headers")]
    pub headers: Vec<String>,
}

impl fmt::Debug for DkimConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DkimConfig")
            .field(
                "private_key",
                &if self.private_key.is_empty() {
                    ""
                } else {
                    "<redacted>"
                },
            )
            .field("private_key_path", &self.private_key_path)
            .field("selector", &self.selector)
            .field("domain", &self.domain)
            .field("headers", &self.headers)
            .finish()
    }
}

impl DkimConfig {
    pub fn new(
        private_key: impl Into<String>,
        selector: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            private_key: private_key.into(),
            private_key_path: None,
            selector: selector.into(),
            domain: domain.into(),
            headers: defaults::headers(),
        }
    }

    /// Read `private_key_path` into `private_key` if no key is set inline.
    ///
    /// # Errors
    /// Returns [`DkimError::Io`](crate::DkimError::Io) if the file cannot be read.
    pub fn load_key(&mut self) -> Result<()> {
        if self.private_key.trim().is_empty()
            && let Some(path) = &self.private_key_path
        {
            self.private_key = std::fs::read_to_string(path)?;
        }
        Ok(())
    }

    /// Nothing is configured: no key, key file, selector or domain.
    pub fn is_blank(&self) -> bool {
        self.private_key.trim().is_empty()
            && self.private_key_path.is_none()
            && self.selector.trim().is_empty()
            && self.domain.trim().is_empty()
    }

    /// All three of key, selector and domain are present.
    pub fn is_complete(&self) -> bool {
        !self.private_key.trim().is_empty()
            && !self.selector.trim().is_empty()
            && !self.domain.trim().is_empty()
    }
}

/// Whether mail sent through `kind` should carry a DKIM signature.
///
/// Only transports that put mail on the network are signed, and only when
/// the configuration names a key, a selector and a domain. Transports refuse
/// to start with a configuration that is neither blank nor complete.
pub fn should_sign(kind: TransportKind, config: Option<&DkimConfig>) -> bool {
    kind.is_network() && config.is_some_and(DkimConfig::is_complete)
}

mod defaults {
    pub fn headers() -> Vec<String> {
        [
            "From",
            "To",
            "Subject",
            "Date",
            "Message-ID",
            "MIME-Version",
            "Content-Type",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
}
