//! Error taxonomy shared by every blaze component.
//!
//! Each crate keeps its own detailed error type (DNS, client, token, ...) and
//! converts into [`GatewayError`] at its public boundary, so the SMTP session
//! and the HTTP API can map failures onto replies without knowing where they
//! came from.

use std::{fmt, io};

use thiserror::Error;

use crate::trust::TrustReport;

/// The resource that a request ran out of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capacity {
    /// Message data grew beyond the configured maximum.
    MessageSize { limit: usize },
    /// Too many recipients for one envelope.
    Recipients { limit: usize },
    /// A single line was longer than allowed.
    LineLength { limit: usize },
    /// Request body field too large (API submissions).
    Field { field: &'static str, limit: usize },
    /// No rate-limit token was available for the caller.
    RateLimit,
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MessageSize { limit } => {
                write!(f, "message exceeds maximum size of {limit} bytes")
            }
            Self::Recipients { limit } => write!(f, "too many recipients (maximum {limit})"),
            Self::LineLength { limit } => write!(f, "line exceeds {limit} characters"),
            Self::Field { field, limit } => write!(f, "{field} exceeds {limit} bytes"),
            Self::RateLimit => f.write_str("rate limit exceeded"),
        }
    }
}

/// Failure classes surfaced by the gateway.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Malformed envelope or request shape.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Bad credentials, or invalid/expired claims.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The sending domain did not pass the required trust checks.
    #[error("Domain {} failed trust verification: {}", .0.domain(), .0.summary())]
    TrustVerification(Box<TrustReport>),

    /// A size, count or rate limit was hit.
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(Capacity),

    /// DNS, TLS or connection failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Out-of-sequence command, malformed framing or a rejection reply.
    #[error("Protocol violation: {0}")]
    Protocol(String),
}

impl GatewayError {
    /// Returns `true` if the caller supplied something unacceptable, as
    /// opposed to a verification or system failure.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Authentication(_) | Self::CapacityExceeded(_)
        )
    }

    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// The itemized trust report, if this is a verification failure
    #[must_use]
    pub fn trust_report(&self) -> Option<&TrustReport> {
        match self {
            Self::TrustVerification(report) => Some(&**report),
            _ => None,
        }
    }
}

impl From<io::Error> for GatewayError {
    fn from(err: io::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Errors that end an inbound session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Protocol error occurred during session.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection error occurred.
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    /// Shutdown signal received.
    #[error("Shutdown requested")]
    Shutdown,

    /// Session timed out.
    #[error("Session timed out after {0} seconds")]
    Timeout(u64),
}

impl SessionError {
    /// Returns `true` if the error indicates a graceful shutdown.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }

    /// Returns `true` if the error is a client-side issue.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::Domain,
        trust::{CheckStatus, TrustReport},
    };

    #[test]
    fn test_gateway_error_display() {
        let err = GatewayError::CapacityExceeded(Capacity::MessageSize { limit: 1024 });
        assert_eq!(
            err.to_string(),
            "Capacity exceeded: message exceeds maximum size of 1024 bytes"
        );

        let err = GatewayError::Protocol("need MAIL before RCPT".to_string());
        assert_eq!(err.to_string(), "Protocol violation: need MAIL before RCPT");
    }

    #[test]
    fn test_trust_failure_carries_report() {
        let report = TrustReport::new(
            Domain::new("example.com"),
            CheckStatus::Invalid("no MX records".to_string()),
            CheckStatus::Valid,
            CheckStatus::Valid,
            CheckStatus::Valid,
        );
        let err = GatewayError::TrustVerification(Box::new(report));

        assert!(!err.is_client_error());
        assert_eq!(
            err.trust_report().map(|r| r.domain().as_str()),
            Some("example.com")
        );
        assert_eq!(
            err.to_string(),
            "Domain example.com failed trust verification: MX: no MX records"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(GatewayError::Validation(String::new()).is_client_error());
        assert!(GatewayError::Authentication(String::new()).is_client_error());
        assert!(GatewayError::CapacityExceeded(Capacity::RateLimit).is_client_error());
        assert!(!GatewayError::Network(String::new()).is_client_error());
        assert!(!GatewayError::Protocol(String::new()).is_client_error());

        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(GatewayError::from(io_err).is_network());
    }

    #[test]
    fn test_session_error_classification() {
        let err = SessionError::Shutdown;
        assert!(err.is_shutdown());
        assert!(!err.is_client_error());

        let err = SessionError::Timeout(30);
        assert!(!err.is_shutdown());
        assert!(err.is_client_error());
    }
}
