//! A small SMTP client used by [`SmtpTransport`](crate::transport::SmtpTransport).
//!
//! The client speaks one command at a time and hands back the parsed
//! [`Response`]; deciding whether a reply is acceptable is left to the caller.
//!
//! ```no_run
//! use courier_smtp::client::SmtpClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SmtpClient::connect("relay.example.com:587", "relay.example.com".into()).await?;
//! client.read_greeting().await?;
//! let ehlo = client.ehlo("app.example.com").await?;
//! if ehlo.has_capability("STARTTLS") {
//!     client.starttls().await?;
//!     client.ehlo("app.example.com").await?;
//! }
//! client.mail_from("noreply@example.com").await?;
//! client.rcpt_to("user@example.com").await?;
//! client.data().await?;
//! client.send_data("Subject: Hi\r\n\r\nHello\r\n").await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use response::Response;
pub use smtp_client::SmtpClient;
