use std::{fmt, future::Future, time::Duration};

use async_trait::async_trait;
use courier_common::TransportKind;
use courier_dkim::DkimConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Composer, OutgoingMessage, SendReceipt, Transport};
use crate::{
    Result, TransportConfigError, TransportError,
    client::{self, Response, SmtpClient},
    message::envelope_address,
};

/// When to upgrade the relay connection with STARTTLS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsMode {
    /// Never upgrade.
    None,
    /// Upgrade when the relay advertises STARTTLS.
    #[default]
    Opportunistic,
    /// Refuse to send unless the upgrade succeeds.
    Required,
}

/// Relay settings for [`SmtpTransport`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "defaults::port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tls: TlsMode,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Name sent with EHLO.
    #[serde(default = "defaults::helo_name")]
    pub helo_name: String,
    /// Sender used when a job does not name one.
    #[serde(default)]
    pub from: Option<String>,
    /// Limit for each stage of the conversation, in seconds.
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tls", &self.tls)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("helo_name", &self.helo_name)
            .field("from", &self.from)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl SmtpConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            tls: TlsMode::default(),
            accept_invalid_certs: false,
            helo_name: defaults::helo_name(),
            from: None,
            timeout_secs: defaults::timeout(),
        }
    }

    /// # Errors
    /// The first setting that cannot produce a working relay connection.
    pub fn validate(&self) -> std::result::Result<(), TransportConfigError> {
        if self.host.trim().is_empty() {
            return Err(TransportConfigError::MissingField("host"));
        }
        if self.port == 0 {
            return Err(TransportConfigError::InvalidPort);
        }
        if self.username.as_deref().is_some_and(|u| !u.is_empty())
            && self.password.as_deref().is_none_or(str::is_empty)
        {
            return Err(TransportConfigError::UsernameWithoutPassword);
        }
        if self.timeout_secs == 0 {
            return Err(TransportConfigError::MissingField("timeout_secs"));
        }
        Ok(())
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

mod defaults {
    pub const fn port() -> u16 {
        587
    }

    pub fn helo_name() -> String {
        "localhost".to_string()
    }

    pub const fn timeout() -> u64 {
        30
    }
}

/// Delivers through an SMTP relay, one connection per message.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    config: SmtpConfig,
    composer: Composer,
}

impl SmtpTransport {
    /// # Errors
    /// [`TransportConfigError`] if the relay settings or the DKIM key are invalid.
    pub fn new(
        config: SmtpConfig,
        dkim: Option<&DkimConfig>,
    ) -> std::result::Result<Self, TransportConfigError> {
        config.validate()?;
        let composer = Composer::new(TransportKind::Smtp, config.from.clone(), dkim)?;

        debug!(
            host = %config.host,
            port = config.port,
            tls = ?config.tls,
            dkim = composer.signs(),
            "SMTP transport ready"
        );

        Ok(Self { config, composer })
    }

    /// Run one stage of the conversation under the stage timeout.
    async fn stage<T>(
        &self,
        stage: &'static str,
        future: impl Future<Output = client::Result<T>> + Send,
    ) -> Result<T> {
        tokio::time::timeout(self.config.timeout(), future)
            .await
            .map_err(|_| TransportError::Timeout { stage })?
            .map_err(TransportError::from)
    }

    async fn converse(
        &self,
        client: &mut SmtpClient,
        envelope_from: &str,
        recipients: &[&str],
        data: &str,
    ) -> Result<Response> {
        expect("greeting", self.stage("greeting", client.read_greeting()).await?, 220)?;

        let helo_name = self.config.helo_name.as_str();
        let mut ehlo = self.stage("EHLO", client.ehlo(helo_name)).await?;
        if !ehlo.is_success() {
            let helo = self.stage("HELO", client.helo(helo_name)).await?;
            ehlo = expect("HELO", helo, 250)?;
        }

        match self.config.tls {
            TlsMode::None => {}
            TlsMode::Opportunistic | TlsMode::Required if ehlo.has_capability("STARTTLS") => {
                expect("STARTTLS", self.stage("STARTTLS", client.starttls()).await?, 220)?;
                ehlo = expect("EHLO", self.stage("EHLO", client.ehlo(helo_name)).await?, 250)?;
            }
            TlsMode::Required => {
                return Err(TransportError::TlsUnavailable(self.config.host.clone()));
            }
            TlsMode::Opportunistic => {
                debug!(host = %self.config.host, "Relay does not offer STARTTLS");
            }
        }

        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password)
            && !username.is_empty()
        {
            if !ehlo.has_capability("AUTH") {
                warn!(host = %self.config.host, "Relay does not advertise AUTH, trying anyway");
            }
            expect(
                "AUTH",
                self.stage("AUTH", client.auth_plain(username, password)).await?,
                235,
            )?;
        }

        expect(
            "MAIL FROM",
            self.stage("MAIL FROM", client.mail_from(envelope_from)).await?,
            250,
        )?;
        for recipient in recipients {
            let response = self.stage("RCPT TO", client.rcpt_to(recipient)).await?;
            if response.code != 251 {
                expect("RCPT TO", response, 250)?;
            }
        }
        expect("DATA", self.stage("DATA", client.data()).await?, 354)?;
        expect(
            "message",
            self.stage("message", client.send_data(data)).await?,
            250,
        )
    }
}

/// Accept only the expected reply code.
fn expect(stage: &'static str, response: Response, code: u16) -> Result<Response> {
    if response.code == code {
        Ok(response)
    } else {
        Err(TransportError::Rejected {
            stage,
            code: response.code,
            message: response.message(),
        })
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Smtp
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<SendReceipt> {
        let mime = self.composer.compose(message)?;
        let message_id = mime.header("Message-ID").unwrap_or_default().to_string();
        let envelope_from = mime.header("From").map(envelope_address).unwrap_or_default();
        let recipients: Vec<&str> = message.to.iter().map(|to| envelope_address(to)).collect();
        let data = mime.to_string();

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let mut client = self
            .stage(
                "connect",
                SmtpClient::connect(&addr, self.config.host.clone()),
            )
            .await?
            .accept_invalid_certs(self.config.accept_invalid_certs);

        let result = self
            .converse(&mut client, envelope_from, &recipients, &data)
            .await;

        // The message is already accepted or refused; a failed QUIT changes neither.
        if let Err(err) = self.stage("QUIT", client.quit()).await {
            debug!(host = %self.config.host, error = %err, "QUIT failed");
        }

        let accepted = result?;
        debug!(
            host = %self.config.host,
            message_id = %message_id,
            tls = client.is_tls(),
            "Relay accepted message"
        );

        Ok(SendReceipt {
            message_id,
            detail: accepted.message(),
        })
    }
}
