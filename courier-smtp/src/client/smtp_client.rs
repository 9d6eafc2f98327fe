//! One relay connection, plain or upgraded with STARTTLS.

use std::sync::Arc;

use base64::prelude::*;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    client::TlsStream,
    rustls::{
        ClientConfig, DigitallySignedStruct, Error as TlsError, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};

use super::{
    error::{ClientError, Result},
    response::Response,
};

/// Bytes read from the socket at a time.
const READ_CHUNK: usize = 4096;

/// Longest reply we are prepared to buffer.
const MAX_REPLY: usize = 64 * 1024;

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }
}

/// A client talking to one relay, one command at a time.
pub struct SmtpClient {
    stream: Option<Stream>,
    /// Bytes received but not yet decoded into a reply.
    pending: Vec<u8>,
    server_domain: String,
    accept_invalid_certs: bool,
}

impl std::fmt::Debug for SmtpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpClient")
            .field("server_domain", &self.server_domain)
            .field("tls", &self.is_tls())
            .finish_non_exhaustive()
    }
}

impl SmtpClient {
    /// Open a plain connection to `addr`.
    ///
    /// `server_domain` is the name the certificate is checked against after
    /// STARTTLS.
    ///
    /// # Errors
    /// Returns an error if the TCP connection fails.
    pub async fn connect(addr: &str, server_domain: String) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;

        Ok(Self {
            stream: Some(Stream::Plain(stream)),
            pending: Vec::with_capacity(READ_CHUNK),
            server_domain,
            accept_invalid_certs: false,
        })
    }

    /// Skip certificate verification after STARTTLS. For test relays only.
    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub const fn is_tls(&self) -> bool {
        matches!(self.stream, Some(Stream::Tls(_)))
    }

    /// # Errors
    /// Returns an error if the greeting cannot be read.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_reply().await
    }

    /// Send one command line and wait for its reply.
    ///
    /// # Errors
    /// [`ClientError::InvalidArgument`] if `line` contains CR or LF, which
    /// would smuggle a second command onto the wire; otherwise any I/O or
    /// reply parsing error.
    pub async fn command(&mut self, line: &str) -> Result<Response> {
        if line.contains(['\r', '\n']) {
            return Err(ClientError::InvalidArgument(
                "command contains a line break".to_string(),
            ));
        }
        self.stream_mut()?
            .write_all(format!("{line}\r\n").as_bytes())
            .await?;
        self.read_reply().await
    }

    /// # Errors
    /// See [`SmtpClient::command`].
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await
    }

    /// # Errors
    /// See [`SmtpClient::command`].
    pub async fn helo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("HELO {domain}")).await
    }

    /// `AUTH PLAIN` (RFC 4616) with the credentials as the initial response.
    ///
    /// # Errors
    /// See [`SmtpClient::command`].
    pub async fn auth_plain(&mut self, username: &str, password: &str) -> Result<Response> {
        let token = BASE64_STANDARD.encode(format!("\0{username}\0{password}"));
        self.command(&format!("AUTH PLAIN {token}")).await
    }

    /// # Errors
    /// [`ClientError::InvalidArgument`] if `from` is not a bare address.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        let from = reverse_path(from)?;
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    /// # Errors
    /// [`ClientError::InvalidArgument`] if `to` is not a bare address.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        let to = forward_path(to)?;
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// # Errors
    /// See [`SmtpClient::command`].
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Send the message after a 354 reply, then the terminating `.` line.
    ///
    /// Leading dots are doubled and every line ending is sent as CRLF.
    ///
    /// # Errors
    /// Returns an error if sending fails or the reply cannot be read.
    pub async fn send_data(&mut self, message: &str) -> Result<Response> {
        let mut payload = dot_stuff(message);
        payload.push_str(".\r\n");
        self.stream_mut()?.write_all(payload.as_bytes()).await?;
        self.read_reply().await
    }

    /// # Errors
    /// See [`SmtpClient::command`].
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    /// Ask for STARTTLS and, when the relay agrees, upgrade the connection.
    ///
    /// Anything the relay sent before the handshake is discarded.
    ///
    /// # Errors
    /// Returns an error if the command or the TLS handshake fails.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.command("STARTTLS").await?;
        if !response.is_success() {
            return Ok(response);
        }

        let tcp = match self.stream.take() {
            Some(Stream::Plain(tcp)) => tcp,
            other => {
                self.stream = other;
                return Err(ClientError::TlsError("Connection is already TLS".to_string()));
            }
        };
        let name = ServerName::try_from(self.server_domain.clone())
            .map_err(|e| ClientError::TlsError(format!("Invalid domain: {e}")))?;
        let tls = connector(self.accept_invalid_certs)?
            .connect(name, tcp)
            .await
            .map_err(|e| ClientError::TlsError(e.to_string()))?;

        self.stream = Some(Stream::Tls(Box::new(tls)));
        self.pending.clear();
        Ok(response)
    }

    fn stream_mut(&mut self) -> Result<&mut Stream> {
        self.stream.as_mut().ok_or(ClientError::ConnectionClosed)
    }

    async fn read_reply(&mut self) -> Result<Response> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some((response, used)) = Response::decode(&self.pending)? {
                self.pending.drain(..used);
                tracing::trace!(code = response.code, "SMTP response");
                return Ok(response);
            }
            if self.pending.len() > MAX_REPLY {
                return Err(ClientError::ParseError(format!(
                    "Reply exceeds {MAX_REPLY} bytes"
                )));
            }

            let n = self.stream_mut()?.read(&mut chunk).await?;
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }
}

fn connector(accept_invalid_certs: bool) -> Result<TlsConnector> {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    if !native.errors.is_empty() {
        tracing::warn!(?native.errors, "Some certificates could not be loaded");
    }
    for cert in native.certs {
        roots
            .add(cert)
            .map_err(|e| ClientError::TlsError(format!("Failed to add certificate: {e}")))?;
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    if accept_invalid_certs {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(AcceptAnyCert));
    }

    Ok(TlsConnector::from(Arc::new(config)))
}

/// The address inside `MAIL FROM:<...>`. Empty is the null sender.
fn reverse_path(address: &str) -> Result<&str> {
    if address.is_empty() {
        return Ok(address);
    }
    forward_path(address)
}

/// The address inside `RCPT TO:<...>`: no whitespace, control characters or
/// angle brackets, and exactly one `@` with something on either side.
fn forward_path(address: &str) -> Result<&str> {
    let clean = !address
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == '<' || c == '>');
    let well_formed = address.rsplit_once('@').is_some_and(|(local, domain)| {
        !local.is_empty() && !domain.is_empty() && !local.contains('@')
    });

    if clean && well_formed {
        Ok(address)
    } else {
        Err(ClientError::InvalidArgument(format!(
            "'{}' is not a valid envelope address",
            address.escape_debug()
        )))
    }
}

/// Double leading dots and normalise line endings to CRLF, so the final
/// `.` line is unambiguous.
fn dot_stuff(message: &str) -> String {
    let mut out = String::with_capacity(message.len() + 64);
    for line in message.lines() {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    out
}

/// Certificate verifier installed by `accept_invalid_certs`.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_stuffing() {
        assert_eq!(dot_stuff("a\r\n.b\n..c"), "a\r\n..b\r\n...c\r\n");
        assert_eq!(dot_stuff("Hello\r\n"), "Hello\r\n");
        assert_eq!(dot_stuff(""), "");
    }

    #[test]
    fn test_envelope_paths() {
        assert!(forward_path("user@example.com").is_ok());
        assert!(reverse_path("").is_ok());
        assert!(forward_path("").is_err());

        for bad in [
            "a@example.com>\r\nRCPT TO:<victim@evil.example",
            "a@example.com\nDATA",
            "a b@example.com",
            "a@example.com>",
            "no-at-sign",
            "@example.com",
            "user@",
        ] {
            assert!(
                matches!(forward_path(bad), Err(ClientError::InvalidArgument(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
