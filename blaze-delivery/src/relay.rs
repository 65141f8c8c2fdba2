//! Relaying a message to an upstream server over a single connection.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use blaze_common::{
    GatewayError,
    traits::relay::{MessageRelay, Outgoing},
};
use blaze_smtp::client::{ClientError, Response, SmtpClient};
use tracing::{debug, info, instrument, warn};
use ulid::Ulid;

use crate::{
    config::{RelayConfig, RelayProfile},
    error::RelayError,
};

/// Encoded words are limited to 75 characters, which leaves room for 45
/// bytes of base64 input after the `=?UTF-8?B?` framing.
const ENCODED_WORD_CHUNK: usize = 45;

/// The header that follows `Subject`, depending on how the message is sent.
#[derive(Debug, Clone, Copy)]
enum Trailer<'a> {
    ContentType { html: bool },
    ReplyTo(&'a str),
}

fn header_value<'a>(name: &'static str, value: &'a str) -> Result<&'a str, RelayError> {
    if value.contains(['\r', '\n']) {
        return Err(RelayError::Header {
            name,
            reason: "value contains a line break".to_string(),
        });
    }
    Ok(value)
}

/// `subject` as is when it's ASCII, otherwise as folded RFC 2047 `B` words.
fn encode_subject(subject: &str) -> String {
    if subject.is_ascii() {
        return subject.to_string();
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for ch in subject.chars() {
        if chunk.len() + ch.len_utf8() > ENCODED_WORD_CHUNK {
            words.push(format!("=?UTF-8?B?{}?=", STANDARD.encode(&chunk)));
            chunk.clear();
        }
        chunk.push(ch);
    }
    if !chunk.is_empty() {
        words.push(format!("=?UTF-8?B?{}?=", STANDARD.encode(&chunk)));
    }

    words.join("\r\n ")
}

/// Build the header block and body sent after DATA.
fn compose(message: &Outgoing<'_>, trailer: Trailer<'_>, hello_name: &str) -> Result<String, RelayError> {
    let subject = header_value("Subject", message.subject)?;
    let trailer = match trailer {
        Trailer::ContentType { html } => {
            let kind = if html { "text/html" } else { "text/plain" };
            format!("MIME-Version: 1.0\r\nContent-Type: {kind}; charset=\"UTF-8\"\r\n")
        }
        Trailer::ReplyTo(reply_to) => {
            format!("Reply-To: {}\r\n", header_value("Reply-To", reply_to)?)
        }
    };

    let mut content = format!(
        "From: {}\r\nTo: {}\r\nSubject: {}\r\nDate: {}\r\nMessage-ID: <{}@{}>\r\n{trailer}",
        message.from,
        message.to,
        encode_subject(subject),
        chrono::Utc::now().to_rfc2822(),
        Ulid::new(),
        hello_name,
    );
    content.reserve(message.body.len() + 2);
    content.push_str("\r\n");
    content.push_str(message.body);
    Ok(content)
}

/// Relays each message over its own upstream connection: implicit TLS,
/// `AUTH PLAIN`, one envelope, `QUIT`. Nothing is retried.
pub struct Relay {
    config: RelayConfig,
    development_mode: bool,
}

impl Relay {
    /// With `development_mode` set, upstream connections are plain TCP.
    #[must_use]
    pub const fn new(config: RelayConfig, development_mode: bool) -> Self {
        Self {
            config,
            development_mode,
        }
    }

    const fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_secs)
    }

    /// Await one reply within the command timeout and require it to succeed.
    async fn expect(
        &self,
        step: &'static str,
        reply: impl Future<Output = Result<Response, ClientError>> + Send,
    ) -> Result<Response, RelayError> {
        tokio::time::timeout(self.timeout(), reply)
            .await
            .map_err(|_| RelayError::Timeout(step, self.config.command_timeout_secs))?
            .and_then(|response| response.ensure(step))
            .map_err(|source| RelayError::Step { step, source })
    }

    async fn connect(&self, host: &str) -> Result<SmtpClient, RelayError> {
        let address = format!("{host}:{}", self.config.port);
        debug!(%address, tls = !self.development_mode, "Dialing upstream");

        let connect = async {
            let mut client = if self.development_mode {
                SmtpClient::connect(&address).await?
            } else {
                SmtpClient::connect_tls(&address, host, self.config.accept_invalid_certs).await?
            };
            client.read_greeting().await?.ensure("greeting")?;
            Ok::<_, ClientError>(client)
        };

        tokio::time::timeout(self.timeout(), connect)
            .await
            .map_err(|_| RelayError::Timeout("connect", self.config.command_timeout_secs))?
            .map_err(|source| RelayError::Connect { address, source })
    }

    #[instrument(level = "debug", skip_all, fields(%host, from = %message.from, to = %message.to))]
    async fn transmit(
        &self,
        host: &str,
        profile: &RelayProfile,
        message: &Outgoing<'_>,
        content: &str,
    ) -> Result<(), RelayError> {
        let mut client = self.connect(host).await?;

        self.expect("EHLO", client.ehlo(&self.config.hello_name))
            .await?;

        let credentials = profile.credentials();
        self.expect("AUTH", client.auth_plain(&credentials))
            .await
            .map_err(|err| match err {
                RelayError::Step {
                    source: source @ ClientError::Rejected { .. },
                    ..
                } => RelayError::Authentication(source),
                other => other,
            })?;

        self.expect("MAIL FROM", client.mail_from(&message.from.to_string()))
            .await?;
        self.expect("RCPT TO", client.rcpt_to(&message.to.to_string()))
            .await?;
        self.expect("DATA", client.data()).await?;
        self.expect("message content", client.send_data(content))
            .await?;

        // The message has been accepted at this point
        if let Err(err) = self.expect("QUIT", client.quit()).await {
            warn!(%err, "Upstream did not close cleanly");
        }

        info!("Relayed message upstream");
        Ok(())
    }
}

#[async_trait]
impl MessageRelay for Relay {
    async fn send(
        &self,
        message: &Outgoing<'_>,
        html: bool,
        destination: &str,
    ) -> Result<(), GatewayError> {
        let content = compose(message, Trailer::ContentType { html }, &self.config.hello_name)?;
        let host = if destination.is_empty() {
            self.config.host.as_str()
        } else {
            destination
        };

        Ok(self
            .transmit(host, &self.config.default, message, &content)
            .await?)
    }

    async fn send_with_verified_sender(
        &self,
        message: &Outgoing<'_>,
        reply_to: &str,
    ) -> Result<(), GatewayError> {
        let content = compose(message, Trailer::ReplyTo(reply_to), &self.config.hello_name)?;

        Ok(self
            .transmit(&self.config.host, &self.config.verified, message, &content)
            .await?)
    }
}
