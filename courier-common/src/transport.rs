use std::fmt;

use serde::{Deserialize, Serialize};

/// The channel a transport delivers mail through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Direct SMTP conversation with a relay.
    Smtp,
    /// HTTP mail provider API.
    Api,
    /// Hand-off to a local `sendmail` binary.
    Sendmail,
    /// Discards mail.
    Null,
}

impl TransportKind {
    /// Whether mail leaves this host through this transport.
    pub const fn is_network(self) -> bool {
        matches!(self, Self::Smtp | Self::Api)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Smtp => "smtp",
            Self::Api => "api",
            Self::Sendmail => "sendmail",
            Self::Null => "null",
        })
    }
}
