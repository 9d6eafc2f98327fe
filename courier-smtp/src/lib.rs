//! Outbound mail transmission.
//!
//! - [`message`]: MIME assembly
//! - [`transport`]: the [`Transport`] trait with SMTP and HTTP API implementations
//! - [`attachment`]: loading attachment content referenced by jobs
//! - [`client`]: the SMTP client the SMTP transport drives

pub mod attachment;
pub mod client;
mod error;
pub mod message;
pub mod transport;

pub use attachment::{AttachmentResolver, HttpAttachmentResolver, LocalAttachmentResolver};
pub use error::{Result, TransportConfigError, TransportError};
pub use message::{Attachment, MessageBuilder, MimeMessage};
pub use transport::{
    ApiConfig, ApiTransport, OutgoingMessage, SendReceipt, SmtpConfig, SmtpTransport, TlsMode,
    Transport, TransportConfig,
};
