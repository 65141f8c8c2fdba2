use std::{net::SocketAddr, sync::Arc};

use blaze_common::{
    Signal, internal,
    traits::{relay::MessageRelay, verify::SenderVerifier},
    tracing,
};
use futures_util::future::join_all;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::broadcast,
    task::JoinHandle,
};
use tokio_rustls::TlsAcceptor;

use crate::{
    config::SmtpConfig,
    connection,
    error::ListenerError,
    session::{Session, SessionConfig},
};

/// Accepts inbound connections and runs one [`Session`] per client.
pub struct Listener {
    address: SocketAddr,
    config: Arc<SessionConfig>,
    acceptor: Option<TlsAcceptor>,
    verifier: Arc<dyn SenderVerifier>,
    relay: Arc<dyn MessageRelay>,
}

impl Listener {
    /// Prepare a listener from the `smtp` configuration section.
    ///
    /// Connections use implicit TLS whenever a certificate is configured,
    /// unless `development_mode` is set.
    ///
    /// # Errors
    ///
    /// Fails if the certificate or key cannot be loaded.
    pub fn new(
        smtp: &SmtpConfig,
        destination: impl Into<String>,
        development_mode: bool,
        verifier: Arc<dyn SenderVerifier>,
        relay: Arc<dyn MessageRelay>,
    ) -> Result<Self, ListenerError> {
        let config = SessionConfig::builder()
            .with_hostname(smtp.hostname.as_str())
            .with_extensions(smtp.extensions.clone())
            .with_limits(smtp.limits)
            .with_timeouts(smtp.timeouts)
            .with_credentials(smtp.credentials.clone())
            .with_require_auth(smtp.require_auth)
            .with_destination(destination)
            .build();

        let acceptor = match &smtp.tls {
            Some(tls) if !development_mode => Some(connection::acceptor(tls)?),
            Some(_) => {
                internal!(level = WARN, "Development mode: serving SMTP without TLS");
                None
            }
            None => None,
        };

        Ok(Self {
            address: smtp.listen,
            config: Arc::new(config),
            acceptor,
            verifier,
            relay,
        })
    }

    /// Serve until a shutdown signal arrives, then wait for open sessions to
    /// finish.
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound or accepting fails.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), ListenerError> {
        let listener = TcpListener::bind(self.address)
            .await
            .map_err(|source| ListenerError::Bind {
                address: self.address,
                source,
            })?;

        self.serve_on(listener, &mut shutdown).await
    }

    /// Serve on an already bound socket.
    ///
    /// # Errors
    ///
    /// Fails if accepting a connection fails.
    pub async fn serve_on(
        &self,
        listener: TcpListener,
        shutdown: &mut broadcast::Receiver<Signal>,
    ) -> Result<(), ListenerError> {
        internal!(
            level = INFO,
            "SMTP listening on {} ({})",
            self.address,
            if self.acceptor.is_some() { "implicit TLS" } else { "plain" }
        );

        let mut sessions = Vec::new();

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if matches!(sig, Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Closed)) {
                        internal!(level = INFO, "SMTP listener received shutdown signal, finishing sessions ...");
                        join_all(sessions).await;
                        break;
                    }
                }

                connection = listener.accept() => {
                    let (stream, peer) = connection.map_err(ListenerError::Accept)?;
                    tracing::debug!(%peer, "Connection received");
                    sessions.retain(|handle: &JoinHandle<()>| !handle.is_finished());
                    sessions.push(self.spawn(stream, peer, shutdown.resubscribe()));
                }
            }
        }

        Ok(())
    }

    fn spawn(
        &self,
        stream: tokio::net::TcpStream,
        peer: SocketAddr,
        signal: broadcast::Receiver<Signal>,
    ) -> JoinHandle<()> {
        let acceptor = self.acceptor.clone();
        let config = Arc::clone(&self.config);
        let verifier = Arc::clone(&self.verifier);
        let relay = Arc::clone(&self.relay);

        tokio::spawn(async move {
            match acceptor {
                Some(acceptor) => match connection::accept(&acceptor, stream).await {
                    Ok(stream) => run(stream, peer, config, verifier, relay, signal).await,
                    Err(err) => internal!(level = WARN, "TLS handshake with {peer} failed: {err}"),
                },
                None => run(stream, peer, config, verifier, relay, signal).await,
            }
        })
    }
}

async fn run<Stream: AsyncRead + AsyncWrite + Unpin + Send>(
    stream: Stream,
    peer: SocketAddr,
    config: Arc<SessionConfig>,
    verifier: Arc<dyn SenderVerifier>,
    relay: Arc<dyn MessageRelay>,
    signal: broadcast::Receiver<Signal>,
) {
    let session = Session::create(stream, peer, config, verifier, relay);

    match session.run(signal).await {
        Ok(()) => {}
        Err(err) if err.is_shutdown() => {
            tracing::debug!(%peer, "Session ended by shutdown");
        }
        Err(err) if err.is_client_error() => {
            internal!(level = INFO, "Session with {peer} ended: {err}");
        }
        Err(err) => internal!(level = ERROR, "Session with {peer} failed: {err}"),
    }
}
