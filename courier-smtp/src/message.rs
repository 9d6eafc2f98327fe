//! MIME message assembly.
//!
//! [`MessageBuilder`] produces a [`MimeMessage`]: an ordered header list and
//! an encoded body, kept apart so the DKIM signer can see exactly the headers
//! that will be sent.
//!
//! | Content                 | Structure                                        |
//! |-------------------------|--------------------------------------------------|
//! | text only               | `text/plain`                                     |
//! | HTML only               | `text/html`                                      |
//! | text and HTML           | `multipart/alternative`                          |
//! | any of the above + file | `multipart/mixed` with the body as the first part |

use std::{fmt, fmt::Write as _, path::Path};

use base64::prelude::*;
use chrono::{DateTime, Utc};

use crate::{Result, TransportError};

/// Maximum length of a base64 line in an encoded part.
const LINE_LENGTH: usize = 76;

/// Longest line we pass through without re-encoding (RFC 5322 §2.1.1).
const MAX_LINE_LENGTH: usize = 998;

/// An email attachment with filename, content type, and data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// The filename to use in the MIME header.
    pub filename: String,
    /// The MIME content type (e.g., "application/pdf").
    pub content_type: String,
    /// The attachment data.
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }
}

/// A fully assembled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeMessage {
    /// Header fields in transmission order.
    pub headers: Vec<(String, String)>,
    /// Encoded body with CRLF line endings.
    pub body: String,
}

impl MimeMessage {
    /// First header with this name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Insert a header ahead of all others, as trace and signature headers are.
    pub fn prepend_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(0, (name.into(), value.into()));
    }
}

impl fmt::Display for MimeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            write!(f, "{name}: {value}\r\n")?;
        }
        f.write_str("\r\n")?;
        f.write_str(&self.body)
    }
}

/// Builder for constructing email messages with proper MIME formatting.
///
/// ```
/// use courier_smtp::message::MessageBuilder;
///
/// let message = MessageBuilder::new()
///     .from("Courier <noreply@example.com>")
///     .to("user@example.com")
///     .subject("Hello")
///     .text("This is the message body")
///     .build()
///     .unwrap();
///
/// assert_eq!(message.header("Subject"), Some("Hello"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    subject: Option<String>,
    text: Option<String>,
    html: Option<String>,
    headers: Vec<(String, String)>,
    attachments: Vec<Attachment>,
    message_id: Option<String>,
    date: Option<DateTime<Utc>>,
}

impl MessageBuilder {
    /// Creates a new empty message builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the From header.
    #[must_use]
    pub fn from(mut self, mailbox: impl Into<String>) -> Self {
        self.from = Some(mailbox.into());
        self
    }

    /// Adds a recipient to the To header.
    #[must_use]
    pub fn to(mut self, mailbox: impl Into<String>) -> Self {
        self.to.push(mailbox.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the plain text body.
    #[must_use]
    pub fn text(mut self, content: impl Into<String>) -> Self {
        self.text = Some(content.into());
        self
    }

    /// Sets the HTML body.
    #[must_use]
    pub fn html(mut self, content: impl Into<String>) -> Self {
        self.html = Some(content.into());
        self
    }

    /// Adds a custom header, placed after the standard ones.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Overrides the generated `Message-ID` (angle brackets included).
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Overrides the `Date` header, which otherwise is the build time.
    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Builds the final email message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidMessage`] if there is no sender or no
    /// recipient, or if any header value, attachment filename or content type
    /// contains a line break.
    pub fn build(self) -> Result<MimeMessage> {
        let from = self
            .from
            .filter(|from| !from.trim().is_empty())
            .ok_or_else(|| TransportError::InvalidMessage("message has no sender".to_string()))?;
        if self.to.iter().all(|to| to.trim().is_empty()) {
            return Err(TransportError::InvalidMessage(
                "message has no recipient".to_string(),
            ));
        }

        single_line("From", &from)?;
        for to in &self.to {
            single_line("To", to)?;
        }
        if let Some(subject) = &self.subject {
            single_line("Subject", subject)?;
        }
        if let Some(message_id) = &self.message_id {
            single_line("Message-ID", message_id)?;
        }
        for (name, value) in &self.headers {
            if name.is_empty() || !name.bytes().all(|b| b.is_ascii_graphic() && b != b':') {
                return Err(TransportError::InvalidMessage(format!(
                    "invalid header name {name:?}"
                )));
            }
            single_line(name, value)?;
        }
        for attachment in &self.attachments {
            single_line("attachment filename", &attachment.filename)?;
            single_line("attachment content type", &attachment.content_type)?;
        }

        let message_id = self.message_id.unwrap_or_else(|| {
            let address = envelope_address(&from);
            let domain = address
                .rsplit_once('@')
                .map_or("localhost", |(_, domain)| domain);
            format!("<{}@{domain}>", ulid::Ulid::new())
        });

        let mut headers = vec![
            ("From".to_string(), from),
            ("To".to_string(), self.to.join(", ")),
        ];
        if let Some(subject) = &self.subject {
            headers.push(("Subject".to_string(), encode_header(subject)));
        }
        headers.push((
            "Date".to_string(),
            self.date.unwrap_or_else(Utc::now).to_rfc2822(),
        ));
        headers.push(("Message-ID".to_string(), message_id));
        headers.push(("MIME-Version".to_string(), "1.0".to_string()));
        headers.extend(self.headers);

        let body = match (self.text.as_deref(), self.html.as_deref()) {
            (Some(text), Some(html)) => Part::multipart(
                "alternative",
                vec![Part::text("plain", text), Part::text("html", html)],
            ),
            (None, Some(html)) => Part::text("html", html),
            (text, None) => Part::text("plain", text.unwrap_or_default()),
        };

        let root = if self.attachments.is_empty() {
            body
        } else {
            let mut parts = vec![body];
            parts.extend(self.attachments.iter().map(Part::attachment));
            Part::multipart("mixed", parts)
        };

        headers.extend(root.headers);
        Ok(MimeMessage {
            headers,
            body: root.body,
        })
    }
}

/// One MIME entity: its own headers and encoded content.
struct Part {
    headers: Vec<(String, String)>,
    body: String,
}

impl Part {
    fn text(subtype: &str, text: &str) -> Self {
        let normalized = normalize_line_endings(text);
        let plain = normalized.is_ascii()
            && normalized
                .split("\r\n")
                .all(|line| line.len() <= MAX_LINE_LENGTH);

        let (encoding, body) = if plain {
            ("7bit", normalized)
        } else {
            ("base64", wrap_base64(normalized.as_bytes()))
        };

        Self {
            headers: vec![
                (
                    "Content-Type".to_string(),
                    format!("text/{subtype}; charset=utf-8"),
                ),
                ("Content-Transfer-Encoding".to_string(), encoding.to_string()),
            ],
            body,
        }
    }

    fn attachment(attachment: &Attachment) -> Self {
        let filename = quote(&encode_header(&attachment.filename));
        Self {
            headers: vec![
                (
                    "Content-Type".to_string(),
                    format!("{}; name={filename}", attachment.content_type),
                ),
                ("Content-Transfer-Encoding".to_string(), "base64".to_string()),
                (
                    "Content-Disposition".to_string(),
                    format!("attachment; filename={filename}"),
                ),
            ],
            body: wrap_base64(&attachment.data),
        }
    }

    fn multipart(subtype: &str, parts: Vec<Self>) -> Self {
        let boundary = format!("=_courier_{}", ulid::Ulid::new());
        let mut body = String::new();

        for part in parts {
            let _ = write!(body, "--{boundary}\r\n");
            for (name, value) in &part.headers {
                let _ = write!(body, "{name}: {value}\r\n");
            }
            body.push_str("\r\n");
            body.push_str(&part.body);
            if !part.body.ends_with("\r\n") {
                body.push_str("\r\n");
            }
        }
        let _ = write!(body, "--{boundary}--\r\n");

        Self {
            headers: vec![(
                "Content-Type".to_string(),
                format!("multipart/{subtype}; boundary=\"{boundary}\""),
            )],
            body,
        }
    }
}

/// Header values are written verbatim, so a line break would start a new
/// header (or, in the envelope, a new SMTP command).
fn single_line(field: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n']) {
        return Err(TransportError::InvalidMessage(format!(
            "{field} contains a line break"
        )));
    }
    Ok(())
}

/// The bare address of a mailbox: `Name <a@example.com>` gives `a@example.com`.
pub fn envelope_address(mailbox: &str) -> &str {
    mailbox
        .rsplit_once('<')
        .and_then(|(_, rest)| rest.split_once('>'))
        .map_or(mailbox, |(address, _)| address)
        .trim()
}

/// RFC 2047 encoded-word for non-ASCII header values.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?utf-8?B?{}?=", BASE64_STANDARD.encode(value))
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn normalize_line_endings(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for line in text.split_inclusive('\n') {
        let line = line
            .strip_suffix('\n')
            .map_or(line, |l| l.strip_suffix('\r').unwrap_or(l));
        out.push_str(line);
        out.push_str("\r\n");
    }
    out
}

/// Encodes data as base64 with CRLF line wrapping at 76 characters.
fn wrap_base64(data: &[u8]) -> String {
    let encoded = BASE64_STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / LINE_LENGTH * 2 + 2);
    for line in encoded.as_bytes().chunks(LINE_LENGTH) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push_str("\r\n");
    }
    out
}

/// Guesses the MIME content type based on file extension.
pub fn guess_content_type(path: &Path) -> &'static str {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    match extension.to_lowercase().as_str() {
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "ics" => "text/calendar",
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "json" => "application/json",
        "xml" => "application/xml",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}
