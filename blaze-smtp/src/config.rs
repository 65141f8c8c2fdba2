use std::{net::SocketAddr, path::PathBuf};

use blaze_common::Credentials;
use serde::Deserialize;

use crate::extensions::Extension;

/// Certificate and key used for implicit TLS on the listener.
#[derive(Clone, Debug, Deserialize)]
pub struct TlsContext {
    pub certificate: PathBuf,
    pub key: PathBuf,
}

/// Connection deadlines for inbound sessions.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SmtpTimeouts {
    /// Maximum time to wait for the next line from the client
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Maximum time a single reply may take to write
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,

    /// Maximum time for the whole DATA transfer
    #[serde(default = "default_data_timeout_secs")]
    pub data_timeout_secs: u64,
}

const fn default_read_timeout_secs() -> u64 {
    10
}

const fn default_write_timeout_secs() -> u64 {
    10
}

const fn default_data_timeout_secs() -> u64 {
    300
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            read_timeout_secs: default_read_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            data_timeout_secs: default_data_timeout_secs(),
        }
    }
}

/// Size and count limits for one mail transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Limits {
    /// Maximum accumulated DATA size in bytes, advertised via `SIZE`
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    #[serde(default = "default_max_recipients")]
    pub max_recipients: usize,

    /// Maximum length of one line, excluding the line terminator
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

const fn default_max_message_size() -> usize {
    10 * 1024 * 1024
}

const fn default_max_recipients() -> usize {
    50
}

const fn default_max_line_length() -> usize {
    1000
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            max_recipients: default_max_recipients(),
            max_line_length: default_max_line_length(),
        }
    }
}

/// The `smtp` section of the gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Name announced in the greeting and EHLO reply
    pub hostname: String,

    #[serde(default)]
    pub timeouts: SmtpTimeouts,

    #[serde(default)]
    pub limits: Limits,

    /// Identity clients must present via `AUTH PLAIN`
    pub credentials: Credentials,

    #[serde(default = "default_require_auth")]
    pub require_auth: bool,

    #[serde(default = "Extension::defaults")]
    pub extensions: Vec<Extension>,

    #[serde(default)]
    pub tls: Option<TlsContext>,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 465))
}

const fn default_require_auth() -> bool {
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn limits_default_when_missing() {
        let limits: Limits = serde_json::from_str(r#"{"max_recipients": 3}"#).unwrap();

        assert_eq!(
            limits,
            Limits {
                max_message_size: 10 * 1024 * 1024,
                max_recipients: 3,
                max_line_length: 1000,
            }
        );
    }
}
