use blaze_common::GatewayError;
use blaze_smtp::client::ClientError;
use thiserror::Error;

/// Which step of an upstream exchange failed.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: ClientError,
    },

    #[error("Upstream rejected authentication: {0}")]
    Authentication(#[source] ClientError),

    #[error("{step} failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: ClientError,
    },

    #[error("{0} timed out after {1} seconds")]
    Timeout(&'static str, u64),

    #[error("Invalid header {name}: {reason}")]
    Header { name: &'static str, reason: String },
}

impl From<RelayError> for GatewayError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Header { .. } => Self::Validation(err.to_string()),
            RelayError::Authentication(_) => Self::Authentication(err.to_string()),
            RelayError::Step {
                source: ClientError::Rejected { .. } | ClientError::ParseError(_),
                ..
            } => Self::Protocol(err.to_string()),
            RelayError::Connect { .. } | RelayError::Step { .. } | RelayError::Timeout(..) => {
                Self::Network(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(command: &'static str, code: u16) -> ClientError {
        ClientError::Rejected {
            command,
            code,
            message: "no".to_string(),
        }
    }

    #[test]
    fn classification() {
        let err = RelayError::Step {
            step: "RCPT TO",
            source: rejected("RCPT TO", 550),
        };
        assert!(matches!(GatewayError::from(err), GatewayError::Protocol(_)));

        let err = RelayError::Step {
            step: "DATA",
            source: ClientError::ConnectionClosed,
        };
        assert!(GatewayError::from(err).is_network());

        let err = RelayError::Authentication(rejected("AUTH", 535));
        assert!(matches!(GatewayError::from(err), GatewayError::Authentication(_)));

        assert!(GatewayError::from(RelayError::Timeout("EHLO", 30)).is_network());
    }
}
