use std::{net::SocketAddr, sync::Arc};

use blaze_common::{
    Address, Credentials, GatewayError, internal, message,
    status::Status,
    traits::{
        fsm::FiniteStateMachine,
        relay::{MessageRelay, Outgoing},
        verify::SenderVerifier,
    },
    tracing,
};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufStream};

use crate::{
    State,
    command::{Command, MailParameters},
    config::{Limits, SmtpTimeouts},
    data::{self, DataError},
    extensions::Extension,
    session_state::SessionState,
    state::{Effect, Event},
};

mod io;
mod response;

pub use response::Reply;

/// Settings shared by every session accepted on one listener.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub hostname: Arc<str>,
    pub extensions: Vec<Extension>,
    pub limits: Limits,
    pub timeouts: SmtpTimeouts,
    pub credentials: Credentials,
    pub require_auth: bool,
    /// Host accepted messages are relayed to
    pub destination: String,
}

impl SessionConfig {
    /// Create a new `SessionConfig` builder
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

/// Builder for `SessionConfig`
#[derive(Debug)]
pub struct SessionConfigBuilder {
    hostname: Arc<str>,
    extensions: Vec<Extension>,
    limits: Limits,
    timeouts: SmtpTimeouts,
    credentials: Credentials,
    require_auth: bool,
    destination: String,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self {
            hostname: Arc::from("localhost"),
            extensions: Extension::defaults(),
            limits: Limits::default(),
            timeouts: SmtpTimeouts::default(),
            credentials: Credentials::default(),
            require_auth: true,
            destination: String::new(),
        }
    }
}

impl SessionConfigBuilder {
    /// Set the name announced in the greeting
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<Arc<str>>) -> Self {
        self.hostname = hostname.into();
        self
    }

    #[must_use]
    pub fn with_extensions(mut self, extensions: Vec<Extension>) -> Self {
        self.extensions = extensions;
        self
    }

    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: SmtpTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the identity clients authenticate with
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    #[must_use]
    pub const fn with_require_auth(mut self, require_auth: bool) -> Self {
        self.require_auth = require_auth;
        self
    }

    /// Set the host accepted messages are relayed to
    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    #[must_use]
    pub fn build(self) -> SessionConfig {
        SessionConfig {
            hostname: self.hostname,
            extensions: self.extensions,
            limits: self.limits,
            timeouts: self.timeouts,
            credentials: self.credentials,
            require_auth: self.require_auth,
            destination: self.destination,
        }
    }
}

/// One inbound SMTP session.
///
/// The session owns its envelope and buffered stream. Each operation feeds
/// the FSM and carries out the effect it asks for; the `auth`, `mail`,
/// `rcpt`, `data`, `reset` and `logout` methods can also be driven directly
/// without going through the wire protocol.
pub struct Session<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    peer: SocketAddr,
    stream: BufStream<Stream>,
    state: State,
    context: SessionState,
    config: Arc<SessionConfig>,
    verifier: Arc<dyn SenderVerifier>,
    relay: Arc<dyn MessageRelay>,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    pub fn create(
        stream: Stream,
        peer: SocketAddr,
        config: Arc<SessionConfig>,
        verifier: Arc<dyn SenderVerifier>,
        relay: Arc<dyn MessageRelay>,
    ) -> Self {
        let context = SessionState::new(&config);
        tracing::debug!(session = %context.id, %peer, "Session created");

        Self {
            peer,
            stream: BufStream::new(stream),
            state: State::Idle,
            context,
            config,
            verifier,
            relay,
        }
    }

    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub const fn session_state(&self) -> &SessionState {
        &self.context
    }

    /// Authenticate with `credentials`. Only `PLAIN` is supported.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Authentication`] on a credential mismatch; the
    /// envelope is left untouched.
    pub fn auth(&mut self, mechanism: &str, credentials: &Credentials) -> Result<Reply, GatewayError> {
        let effect = self.feed(Event::Command(Command::Auth {
            mechanism: mechanism.to_ascii_uppercase(),
            initial: None,
        }));

        let effect = match effect {
            Effect::Authenticate(_) => self.authenticate(credentials),
            other => other,
        };

        Self::settle(effect)
    }

    /// Start a transaction from `from`, verifying the sender's domain first.
    ///
    /// # Errors
    ///
    /// [`GatewayError::TrustVerification`] if the domain doesn't meet the
    /// sender policy, in which case nothing changes.
    pub async fn mail(&mut self, from: Address, size: Option<usize>) -> Result<Reply, GatewayError> {
        let mut params = MailParameters::default();
        if let Some(size) = size {
            params.insert("SIZE", size.to_string());
        }

        let effect = self.feed(Event::Command(Command::MailFrom(from, params)));
        let effect = self.resolve(effect).await;
        Self::settle(effect)
    }

    /// Add a recipient to the current transaction.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Protocol`] without a sender, or
    /// [`GatewayError::CapacityExceeded`] past the recipient limit.
    pub fn rcpt(&mut self, to: Address) -> Result<Reply, GatewayError> {
        let effect = self.feed(Event::Command(Command::RcptTo(to)));
        Self::settle(effect)
    }

    /// Read message data from `reader` and relay it to every recipient.
    ///
    /// # Errors
    ///
    /// The first failure, whether reading, parsing or relaying. Either way
    /// the envelope is cleared afterwards.
    pub async fn data<R: AsyncBufRead + Unpin + Send>(
        &mut self,
        reader: &mut R,
    ) -> Result<Reply, GatewayError> {
        let effect = match self.feed(Event::Command(Command::Data)) {
            Effect::ReceiveData => {
                let result = data::read_body(reader, &self.context.limits).await;
                self.finish_data(result).await
            }
            other => other,
        };

        Self::settle(effect)
    }

    /// Clear sender and recipients, keeping authentication.
    pub fn reset(&mut self) -> Reply {
        match self.feed(Event::Command(Command::Rset)) {
            Effect::Reply(reply) | Effect::Close(reply) => reply,
            other => {
                tracing::warn!(?other, "Unexpected effect from RSET");
                Reply::new(Status::Ok, "2.0.0 Reset state")
            }
        }
    }

    /// Release the session's state. Safe to call more than once.
    pub fn logout(&mut self) {
        if self.state != State::Closed {
            internal!(level = DEBUG, "Session {} logged out", self.context.id);
        }

        self.state = State::Closed;
        self.context.reset_transaction();
        self.context.authenticated = None;
    }

    fn feed(&mut self, event: Event) -> Effect {
        let (state, effect) = self.state.transition(event, &mut self.context);
        tracing::trace!(from = %self.state, to = %state, "Transitioned");
        self.state = state;
        effect
    }

    /// Carry out sender verification until the FSM asks for something else.
    async fn resolve(&mut self, mut effect: Effect) -> Effect {
        while let Effect::VerifySender(sender) = effect {
            let event = match self.verifier.verify_sender(&sender).await {
                Ok(report) => {
                    tracing::debug!(sender = %sender, summary = %report.summary(), "Sender verified");
                    Event::SenderVerified(sender)
                }
                Err(err) => {
                    internal!(level = INFO, "Sender {sender} rejected: {err}");
                    Event::Failed(err)
                }
            };
            effect = self.feed(event);
        }

        effect
    }

    fn authenticate(&mut self, presented: &Credentials) -> Effect {
        if self.config.credentials.matches(&presented.username, &presented.password) {
            internal!(level = INFO, "Authenticated {}", presented.username);
            self.feed(Event::Authenticated(presented.username.clone()))
        } else {
            internal!(level = WARN, "Authentication failed for {}", presented.username);
            self.feed(Event::Failed(GatewayError::Authentication(
                "invalid username or password".to_string(),
            )))
        }
    }

    async fn finish_data(&mut self, result: Result<Vec<u8>, DataError>) -> Effect {
        let outcome = match result {
            Ok(raw) => self.deliver(&raw).await,
            Err(err) => Err(GatewayError::from(err)),
        };

        match outcome {
            Ok(()) => self.feed(Event::DataReceived),
            Err(err) => {
                internal!(level = WARN, "Message from session {} failed: {err}", self.context.id);
                self.feed(Event::Failed(err))
            }
        }
    }

    /// Relay `raw` to every recipient in envelope order, stopping at the
    /// first failure.
    #[tracing::instrument(level = "debug", skip_all, fields(session = %self.context.id, size = raw.len()))]
    async fn deliver(&self, raw: &[u8]) -> Result<(), GatewayError> {
        let parsed = message::parse(raw)?;
        if let Some(err) = &parsed.subject_error {
            tracing::warn!(%err, "Subject could not be decoded, relaying it unchanged");
        }

        let message = parsed.message;
        let envelope = &self.context.envelope;
        let sender = envelope
            .sender()
            .ok_or_else(|| GatewayError::Protocol("no sender set".to_string()))?;

        for recipient in envelope.recipients() {
            let outgoing = Outgoing {
                from: sender,
                to: recipient,
                subject: message.subject(),
                body: message.body(),
            };

            self.relay
                .send(&outgoing, message.is_html(), &self.config.destination)
                .await?;
            tracing::info!(from = %sender, to = %recipient, "Relayed message");
        }

        Ok(())
    }

    fn settle(effect: Effect) -> Result<Reply, GatewayError> {
        match effect {
            Effect::Reply(reply) => Ok(reply),
            Effect::Reject { error, .. } => Err(error),
            Effect::Close(reply) => Err(GatewayError::Protocol(format!("session closed: {reply}"))),
            other => Err(GatewayError::Protocol(format!("unexpected effect {other:?}"))),
        }
    }
}
