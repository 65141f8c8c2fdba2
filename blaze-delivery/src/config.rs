use blaze_common::{Credentials, TrustPolicy};
use serde::Deserialize;

/// The `verify` section: how sender and domain trust is decided.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyConfig {
    /// DKIM selector used when a request doesn't name one
    #[serde(default = "default_dkim_selector")]
    pub dkim_selector: String,

    /// Checks a sender's domain must pass before MAIL is accepted
    #[serde(default = "default_sender_policy")]
    pub sender_policy: TrustPolicy,

    /// Checks a domain must pass to be reported as trusted
    #[serde(default = "default_domain_policy")]
    pub domain_policy: TrustPolicy,

    #[serde(default = "default_dns_timeout_secs")]
    pub dns_timeout_secs: u64,
}

fn default_dkim_selector() -> String {
    "default".to_string()
}

const fn default_sender_policy() -> TrustPolicy {
    TrustPolicy::MxOnly
}

const fn default_domain_policy() -> TrustPolicy {
    TrustPolicy::All
}

const fn default_dns_timeout_secs() -> u64 {
    5
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            dkim_selector: default_dkim_selector(),
            sender_policy: default_sender_policy(),
            domain_policy: default_domain_policy(),
            dns_timeout_secs: default_dns_timeout_secs(),
        }
    }
}

/// An identity the relay authenticates upstream with.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayProfile {
    pub username: String,
    pub password: String,
}

impl RelayProfile {
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.as_str(), self.password.as_str())
    }
}

/// The `relay` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Upstream host used for verified-sender relaying
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Host for ordinary relaying; `host` when empty
    #[serde(default)]
    pub destination: String,

    /// Identity for ordinary relaying
    pub default: RelayProfile,

    /// Identity for relaying on behalf of a verified sender
    pub verified: RelayProfile,

    /// Name sent with EHLO
    #[serde(default = "default_hello_name")]
    pub hello_name: String,

    /// Deadline for each step of an upstream exchange
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Skip certificate verification. Only meant for testing against
    /// self-signed upstreams.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

const fn default_port() -> u16 {
    465
}

fn default_hello_name() -> String {
    "localhost".to_string()
}

const fn default_command_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn relay_defaults() {
        let config: RelayConfig = ron::from_str(
            r#"(
                host: "smtp.upstream.test",
                default: (username: "relay@upstream.test", password: "one"),
                verified: (username: "verified", password: "two"),
            )"#,
        )
        .unwrap();

        assert_eq!(config.port, 465);
        assert!(config.destination.is_empty());
        assert_eq!(config.hello_name, "localhost");
        assert_eq!(config.command_timeout_secs, 30);
        assert!(!config.accept_invalid_certs);
        assert!(config.verified.credentials().matches("verified", "two"));
    }

    #[test]
    fn verify_policies_by_name() {
        let config: VerifyConfig =
            ron::from_str("(sender_policy: All, domain_policy: Checks([MX, SPF]))").unwrap();

        assert_eq!(config.sender_policy, TrustPolicy::All);
        assert_eq!(config.domain_policy.required().len(), 2);
        assert_eq!(config.dkim_selector, "default");
    }
}
