//! Errors raised while setting up the SMTP listener.

use std::io;

use thiserror::Error;

/// Errors that can occur while preparing or performing implicit TLS.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to load the certificate chain.
    #[error("Failed to load TLS certificate from {path}: {source}")]
    CertificateLoad {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Failed to load the private key.
    #[error("Failed to load TLS private key from {path}: {reason}")]
    KeyLoad { path: String, reason: String },

    /// The handshake completed without negotiating a version or cipher.
    #[error("Negotiated {0} is unavailable")]
    ProtocolInfoMissing(&'static str),

    #[error("TLS error: {0}")]
    Rustls(String),
}

impl From<tokio_rustls::rustls::Error> for TlsError {
    fn from(err: tokio_rustls::rustls::Error) -> Self {
        Self::Rustls(err.to_string())
    }
}

/// Errors that stop the listener from serving.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Unable to bind {address}: {source}")]
    Bind {
        address: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Unable to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error(transparent)]
    Tls(#[from] TlsError),
}

pub type TlsResult<T> = std::result::Result<T, TlsError>;
