//! API configuration

use std::{net::SocketAddr, time::Duration};

use serde::Deserialize;

/// An account allowed to obtain claims.
#[derive(Clone, Deserialize)]
pub struct ApiUser {
    pub email: String,
    pub password: String,
    /// Domain the user may send verified mail for
    pub domain: String,
}

impl std::fmt::Debug for ApiUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiUser")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("domain", &self.domain)
            .finish()
    }
}

/// Per-client token bucket settings
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RateLimitConfig {
    /// Tokens added to each bucket per second
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Bucket capacity, and the number of tokens a new client starts with
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// How often idle buckets are evicted
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Buckets untouched for this long are evicted
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

const fn default_requests_per_second() -> f64 {
    1.0
}

const fn default_burst() -> u32 {
    5
}

const fn default_sweep_interval_secs() -> u64 {
    10 * 60
}

const fn default_idle_timeout_secs() -> u64 {
    60 * 60
}

impl RateLimitConfig {
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            sweep_interval_secs: default_sweep_interval_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

/// The `api` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Address to bind the HTTP server
    ///
    /// Common values:
    /// - `[::]:8080` (IPv6 any address)
    /// - `127.0.0.1:8080` (localhost only)
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// HMAC key for signing claims. Overridden by `BLAZE_JWT_SECRET`.
    #[serde(default)]
    pub jwt_secret: String,

    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    #[serde(default)]
    pub users: Vec<ApiUser>,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Maximum subject length in bytes
    #[serde(default = "default_max_subject_len")]
    pub max_subject_len: usize,

    /// Maximum body length in bytes
    #[serde(default = "default_max_body_len")]
    pub max_body_len: usize,

    /// Upper bound on handling one request, relaying included
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

const fn default_token_ttl_secs() -> u64 {
    24 * 60 * 60
}

const fn default_max_subject_len() -> usize {
    78
}

const fn default_max_body_len() -> usize {
    1_000_000
}

const fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            jwt_secret: String::new(),
            token_ttl_secs: default_token_ttl_secs(),
            users: Vec::new(),
            rate_limit: RateLimitConfig::default(),
            max_subject_len: default_max_subject_len(),
            max_body_len: default_max_body_len(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ApiConfig {
    /// Find a configured user by e-mail, ignoring case
    #[must_use]
    pub fn user(&self, email: &str) -> Option<&ApiUser> {
        self.users
            .iter()
            .find(|user| user.email.eq_ignore_ascii_case(email.trim()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn rate_limit_defaults() {
        let config = RateLimitConfig::default();
        assert_eq!(config.sweep_interval(), Duration::from_secs(600));
        assert_eq!(config.idle_timeout(), Duration::from_secs(3600));
    }

    #[test]
    fn user_lookup_ignores_case() {
        let config = ApiConfig {
            users: vec![ApiUser {
                email: "Ops@Example.com".to_string(),
                password: "hunter2".to_string(),
                domain: "example.com".to_string(),
            }],
            ..ApiConfig::default()
        };

        assert_eq!(
            config.user("ops@example.com").map(|u| u.domain.as_str()),
            Some("example.com")
        );
        assert!(config.user("other@example.com").is_none());
        assert!(!format!("{:?}", config.users[0]).contains("hunter2"));
    }
}
