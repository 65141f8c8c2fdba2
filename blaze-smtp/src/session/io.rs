use std::time::Duration;

use blaze_common::{
    GatewayError, Signal, error::SessionError, incoming, internal, outgoing, status::Status,
    tracing,
};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::broadcast,
};

use crate::{
    State, auth,
    command::Command,
    data::{self, DataError},
    state::{Effect, Event},
};

use super::{Reply, Session};

/// Outcome of reading one command line.
#[derive(Debug, PartialEq, Eq)]
enum Line {
    Complete,
    /// Longer than the limit; the rest of it has been discarded
    TooLong,
    Closed,
}

/// Read up to `limit` bytes of one line. An over-long line is drained up to
/// and including its terminator.
async fn read_bounded<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    line: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<Line> {
    let read = (&mut *reader).take(limit as u64).read_until(b'\n', line).await?;
    if read == 0 {
        return Ok(Line::Closed);
    }
    if line.ends_with(b"\n") || line.len() < limit {
        return Ok(Line::Complete);
    }

    let mut rest = Vec::with_capacity(limit);
    loop {
        rest.clear();
        let read = (&mut *reader).take(limit as u64).read_until(b'\n', &mut rest).await?;
        if read == 0 || rest.ends_with(b"\n") {
            break;
        }
    }
    line.clear();
    Ok(Line::TooLong)
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    /// Serve the SMTP dialogue until the client quits, the connection drops
    /// or a shutdown signal arrives.
    ///
    /// # Errors
    /// Returns `SessionError` on I/O failure, timeout or shutdown.
    #[tracing::instrument(level = "debug", skip_all, fields(peer = %self.peer, session = %self.context.id))]
    pub async fn run(mut self, mut signal: broadcast::Receiver<Signal>) -> Result<(), SessionError> {
        internal!(level = INFO, "Connected to {}", self.peer);

        let greeting = Reply::new(
            Status::ServiceReady,
            format!("{} ESMTP blaze ready", self.config.hostname),
        );

        let result = match self.send(&greeting).await {
            Ok(()) => self.serve(&mut signal).await,
            Err(err) => Err(err),
        };

        self.logout();
        internal!(level = INFO, "Connection to {} closed", self.peer);
        result
    }

    async fn serve(&mut self, signal: &mut broadcast::Receiver<Signal>) -> Result<(), SessionError> {
        let mut line = Vec::with_capacity(512);

        while self.state != State::Closed {
            let received = tokio::select! {
                _ = signal.recv() => None,
                received = self.read_line(&mut line) => Some(received),
            };

            let Some(received) = received else {
                internal!(level = DEBUG, "Shutdown requested, closing session");
                self.send(&Reply::new(Status::Unavailable, "4.3.2 Server shutting down"))
                    .await?;
                return Err(SessionError::Shutdown);
            };

            match received? {
                Line::Complete => {}
                Line::TooLong => {
                    incoming!("<line over {} octets>", self.context.limits.max_line_length);
                    self.send(&Reply::new(Status::SyntaxError, "5.5.2 Line too long"))
                        .await?;
                    continue;
                }
                // The client closed the connection without QUIT
                Line::Closed => return Ok(()),
            }

            let command = Command::try_from(line.as_slice()).unwrap_or_else(|e| e);
            incoming!("{command}");

            let reply = self.dispatch(command).await?;
            self.send(&reply).await?;
        }

        Ok(())
    }

    /// Feed one command to the FSM and carry out whatever I/O it asks for.
    async fn dispatch(&mut self, command: Command) -> Result<Reply, SessionError> {
        let effect = match self.feed(Event::Command(command)) {
            Effect::Authenticate(initial) => self.exchange_credentials(initial).await?,
            Effect::ReceiveData => self.receive_data().await?,
            other => self.resolve(other).await,
        };

        Ok(match effect {
            Effect::Reply(reply) | Effect::Close(reply) => reply,
            Effect::Reject { status, error } => {
                internal!(level = DEBUG, "Rejecting with {status}: {error}");
                Reply::new(status, error.to_string())
            }
            other => {
                internal!(level = ERROR, "Unhandled effect: {other:?}");
                Reply::new(Status::ActionAborted, "4.3.0 Internal error")
            }
        })
    }

    /// AUTH PLAIN, prompting for the response if it wasn't given inline.
    async fn exchange_credentials(&mut self, initial: Option<String>) -> Result<Effect, SessionError> {
        let response = match initial {
            Some(response) => response,
            None => {
                self.send(&Reply::new(Status::AuthContinue, "")).await?;

                let mut line = Vec::with_capacity(128);
                match self.read_line(&mut line).await? {
                    Line::Complete => {}
                    Line::TooLong => {
                        return Ok(Effect::reply(Status::SyntaxError, "5.5.2 Line too long"));
                    }
                    Line::Closed => {
                        return Err(SessionError::Protocol(
                            "connection closed during AUTH".to_string(),
                        ));
                    }
                }
                String::from_utf8_lossy(&line).trim().to_string()
            }
        };

        if response == "*" {
            return Ok(self.feed(Event::Failed(GatewayError::Authentication(
                "exchange cancelled by client".to_string(),
            ))));
        }

        Ok(match auth::decode_plain(&response) {
            Ok(credentials) => self.authenticate(&credentials),
            Err(err) => self.feed(Event::Failed(err)),
        })
    }

    async fn receive_data(&mut self) -> Result<Effect, SessionError> {
        self.send(&Reply::new(
            Status::StartMailInput,
            "Start mail input; end with <CRLF>.<CRLF>",
        ))
        .await?;

        let limits = self.context.limits;
        let timeout = self.config.timeouts.data_timeout_secs;
        let result = tokio::time::timeout(
            Duration::from_secs(timeout),
            data::read_body(&mut self.stream, &limits),
        )
        .await
        .map_err(|_| SessionError::Timeout(timeout))?;

        if let Err(err) = &result
            && err.needs_discard()
        {
            internal!(level = DEBUG, "Discarding remaining data: {err}");
            let at_line_start = !matches!(err, DataError::LineTooLong { .. });
            tokio::time::timeout(
                Duration::from_secs(timeout),
                data::discard(&mut self.stream, at_line_start),
            )
            .await
            .map_err(|_| SessionError::Timeout(timeout))?
            .map_err(|err| SessionError::Protocol(err.to_string()))?;
        }

        Ok(self.finish_data(result).await)
    }

    /// Read one command line into `line`.
    async fn read_line(&mut self, line: &mut Vec<u8>) -> Result<Line, SessionError> {
        line.clear();

        let secs = self.config.timeouts.read_timeout_secs;
        let limit = self.context.limits.max_line_length + 2;
        let read = tokio::time::timeout(
            Duration::from_secs(secs),
            read_bounded(&mut self.stream, line, limit),
        )
        .await;

        match read {
            Err(_) => {
                internal!(level = DEBUG, "No input for {secs} seconds");
                if let Err(err) = self
                    .send(&Reply::new(Status::Unavailable, "4.4.2 Idle timeout"))
                    .await
                {
                    tracing::debug!(%err, "Unable to send timeout reply");
                }
                Err(SessionError::Timeout(secs))
            }
            Ok(result) => Ok(result?),
        }
    }

    async fn send(&mut self, reply: &Reply) -> Result<(), SessionError> {
        outgoing!("{reply}");

        let secs = self.config.timeouts.write_timeout_secs;
        let mut bytes = reply.to_string().into_bytes();
        bytes.extend_from_slice(b"\r\n");

        let stream = &mut self.stream;
        tokio::time::timeout(Duration::from_secs(secs), async move {
            stream.write_all(&bytes).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| SessionError::Timeout(secs))??;

        Ok(())
    }
}
