//! Gateway configuration, loaded from a RON file.

use std::path::{Path, PathBuf};

use blaze_api::ApiConfig;
use blaze_common::logging::LogConfig;
use blaze_delivery::{RelayConfig, VerifyConfig};
use blaze_smtp::SmtpConfig;
use serde::Deserialize;
use thiserror::Error;

/// Environment variables that override secrets from the file
pub const SMTP_PASSWORD_ENV: &str = "BLAZE_SMTP_PASSWORD";
pub const RELAY_PASSWORD_ENV: &str = "BLAZE_RELAY_PASSWORD";
pub const VERIFIED_PASSWORD_ENV: &str = "BLAZE_VERIFIED_PASSWORD";
pub const JWT_SECRET_ENV: &str = "BLAZE_JWT_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: ron::error::SpannedError,
    },

    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub smtp: SmtpConfig,
    pub relay: RelayConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Plain TCP for both the listener and upstream connections
    #[serde(default)]
    pub development_mode: bool,
}

impl Config {
    /// Read `path`, apply secrets from the environment and validate.
    ///
    /// # Errors
    ///
    /// Fails if the file can't be read or parsed, or the result is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// [`load`](Self::load), looking overrides up with `lookup`.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn load_with(
        path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self::read_with(path, lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path` and apply secrets from the environment, without
    /// validating.
    ///
    /// # Errors
    ///
    /// Fails if the file can't be read or parsed.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        Self::read_with(path, |key| std::env::var(key).ok())
    }

    fn read_with(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Self = ron::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.apply_overrides(lookup);
        Ok(config)
    }

    /// Replace secrets with any values `lookup` finds. Empty values are
    /// ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(password) = lookup(SMTP_PASSWORD_ENV) {
            self.smtp.credentials.password = password;
        }
        if let Some(password) = lookup(RELAY_PASSWORD_ENV) {
            self.relay.default.password = password;
        }
        if let Some(password) = lookup(VERIFIED_PASSWORD_ENV) {
            self.relay.verified.password = password;
        }
        if let Some(secret) = lookup(JWT_SECRET_ENV) {
            self.api.jwt_secret = secret;
        }
    }

    /// Check that everything required to run is present.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] listing every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        let mut require = |ok: bool, problem: &str| {
            if !ok {
                problems.push(problem.to_string());
            }
        };

        require(self.smtp.listen.port() != 0, "SMTP port is required");
        require(!self.smtp.hostname.trim().is_empty(), "SMTP hostname is required");
        require(
            self.smtp.credentials.is_complete(),
            "SMTP username and password are required",
        );
        require(
            self.smtp.limits.max_message_size > 0,
            "maximum message size is required",
        );
        require(
            self.smtp.limits.max_line_length > 0,
            "maximum line length is required",
        );
        require(
            self.smtp.limits.max_recipients > 0,
            "maximum recipient count is required",
        );
        require(
            self.development_mode || self.smtp.tls.is_some(),
            "TLS certificate and key are required outside development mode",
        );

        require(!self.relay.host.trim().is_empty(), "relay host is required");
        require(self.relay.port != 0, "relay port is required");
        require(
            self.relay.default.credentials().is_complete(),
            "default relay username and password are required",
        );
        require(
            self.relay.verified.credentials().is_complete(),
            "verified relay username and password are required",
        );

        require(self.api.listen.port() != 0, "API port is required");
        require(!self.api.jwt_secret.is_empty(), "JWT secret is required");
        require(
            self.api.rate_limit.requests_per_second > 0.0 && self.api.rate_limit.burst > 0,
            "rate limit is required",
        );

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{collections::HashMap, io::Write};

    use blaze_common::TrustPolicy;
    use pretty_assertions::assert_eq;

    use super::*;

    const MINIMAL: &str = r#"(
        smtp: (
            listen: "127.0.0.1:2525",
            hostname: "mx.gateway.test",
            credentials: (username: "submit", password: "from-file"),
        ),
        relay: (
            host: "smtp.upstream.test",
            default: (username: "relay", password: "relay-secret"),
            verified: (username: "verified", password: "verified-secret"),
        ),
        api: (
            listen: "127.0.0.1:8080",
            jwt_secret: "file-secret",
        ),
        development_mode: true,
    )"#;

    fn write(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_with_defaults() {
        let file = write(MINIMAL);
        let config = Config::load_with(file.path(), |_| None).unwrap();

        assert_eq!(config.smtp.hostname, "mx.gateway.test");
        assert_eq!(config.relay.port, 465);
        assert_eq!(config.verify.sender_policy, TrustPolicy::MxOnly);
        assert_eq!(config.verify.domain_policy, TrustPolicy::All);
        assert_eq!(config.api.max_subject_len, 78);
        assert_eq!(config.api.rate_limit.sweep_interval_secs, 600);
        assert!(config.development_mode);
    }

    #[test]
    fn environment_overrides_secrets() {
        let file = write(MINIMAL);
        let env = HashMap::from([
            (SMTP_PASSWORD_ENV, "from-env"),
            (JWT_SECRET_ENV, "env-secret"),
            (RELAY_PASSWORD_ENV, ""),
        ]);

        let config = Config::load_with(file.path(), |key| {
            env.get(key).map(|value| (*value).to_string())
        })
        .unwrap();

        assert_eq!(config.smtp.credentials.password, "from-env");
        assert_eq!(config.api.jwt_secret, "env-secret");
        // Empty values don't clear what the file set
        assert_eq!(config.relay.default.password, "relay-secret");
        assert_eq!(config.relay.verified.password, "verified-secret");
    }

    #[test]
    fn missing_secrets_are_reported_together() {
        let content = MINIMAL
            .replace(r#"jwt_secret: "file-secret","#, "")
            .replace(r#"password: "relay-secret""#, r#"password: """#);
        let file = write(&content);

        let err = Config::load_with(file.path(), |_| None).unwrap_err();
        let ConfigError::Invalid(problems) = err else {
            panic!("expected validation failure, got {err}");
        };

        assert_eq!(
            problems,
            vec![
                "default relay username and password are required".to_string(),
                "JWT secret is required".to_string(),
            ]
        );
    }

    #[test]
    fn zero_limits_are_rejected() {
        let content = MINIMAL.replace(
            r#"credentials: (username: "submit", password: "from-file"),"#,
            r#"credentials: (username: "submit", password: "from-file"),
            limits: (max_line_length: 0, max_recipients: 0),"#,
        );
        let file = write(&content);

        let err = Config::load_with(file.path(), |_| None).unwrap_err();
        let ConfigError::Invalid(problems) = err else {
            panic!("expected validation failure, got {err}");
        };

        assert_eq!(
            problems,
            vec![
                "maximum line length is required".to_string(),
                "maximum recipient count is required".to_string(),
            ]
        );
    }

    #[test]
    fn tls_required_outside_development() {
        let content = MINIMAL.replace("development_mode: true", "development_mode: false");
        let file = write(&content);

        let err = Config::load_with(file.path(), |_| None).unwrap_err();
        assert!(err.to_string().contains("TLS certificate and key are required"));
    }

    #[test]
    fn read_skips_validation() {
        let content = MINIMAL.replace("development_mode: true", "development_mode: false");
        let file = write(&content);

        let mut config = Config::read(file.path()).unwrap();
        assert!(config.validate().is_err());

        config.development_mode = true;
        config.validate().unwrap();
    }

    #[test]
    fn bundled_example_is_valid_with_secrets() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../blaze.ron");
        let config = Config::load_with(&path, |_| Some("secret".to_string())).unwrap();

        assert_eq!(config.smtp.limits.max_message_size, 10 * 1024 * 1024);
        assert_eq!(config.api.users.len(), 1);
        assert!(!config.development_mode);
    }

    #[test]
    fn unreadable_and_malformed_files() {
        let err = Config::load_with(Path::new("/nonexistent/blaze.ron"), |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));

        let file = write("(smtp: ");
        let err = Config::load_with(file.path(), |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
