//! Domain newtype for type safety
//!
//! Wraps domain strings so that an e-mail address or an arbitrary header
//! value can't be passed where a DNS name is expected. Values created through
//! [`Domain::parse`] are normalised (trimmed, lowercased, no trailing dot) and
//! checked against the DNS length and label rules.

use std::{
    fmt::{self, Display},
    ops::Deref,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Longest textual domain name accepted (RFC 1035, without the trailing dot)
const MAX_DOMAIN_LEN: usize = 253;

/// Longest single label accepted (RFC 1035)
const MAX_LABEL_LEN: usize = 63;

/// A domain name string wrapper
///
/// # Examples
///
/// ```
/// use blaze_common::Domain;
///
/// let domain = Domain::parse(" Mail.Example.COM. ").unwrap();
/// assert_eq!(domain.as_str(), "mail.example.com");
///
/// assert!(Domain::parse("not a domain").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Domain(Arc<str>);

impl Domain {
    /// Create a new `Domain` without validation
    ///
    /// Used for values that are already known to be well formed, such as
    /// names produced by the resolver.
    #[must_use]
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Self(s.into())
    }

    /// Parse and normalise a domain name
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] if the input is empty, too long,
    /// contains an empty or over-long label, or contains characters that
    /// can't appear in a host name.
    pub fn parse(input: &str) -> Result<Self, GatewayError> {
        let trimmed = input.trim();
        let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);

        if trimmed.is_empty() {
            return Err(GatewayError::Validation("domain is empty".to_string()));
        }

        if trimmed.len() > MAX_DOMAIN_LEN {
            return Err(GatewayError::Validation(format!(
                "domain exceeds {MAX_DOMAIN_LEN} characters"
            )));
        }

        for label in trimmed.split('.') {
            if label.is_empty() {
                return Err(GatewayError::Validation(format!(
                    "domain '{trimmed}' contains an empty label"
                )));
            }

            if label.len() > MAX_LABEL_LEN {
                return Err(GatewayError::Validation(format!(
                    "domain label '{label}' exceeds {MAX_LABEL_LEN} characters"
                )));
            }

            if label.starts_with('-') || label.ends_with('-') {
                return Err(GatewayError::Validation(format!(
                    "domain label '{label}' may not start or end with '-'"
                )));
            }

            if let Some(bad) = label
                .chars()
                .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
            {
                return Err(GatewayError::Validation(format!(
                    "domain '{trimmed}' contains invalid character {bad:?}"
                )));
            }
        }

        Ok(Self(Arc::from(trimmed.to_ascii_lowercase())))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the DKIM key record for `selector` under this domain
    #[must_use]
    pub fn dkim_record(&self, selector: &str) -> String {
        format!("{selector}._domainkey.{}", self.0)
    }

    /// Name of the DMARC policy record for this domain
    #[must_use]
    pub fn dmarc_record(&self) -> String {
        format!("_dmarc.{}", self.0)
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for Domain {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&str> for Domain {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for Domain {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalises() {
        let domain = Domain::parse("  Example.COM.").unwrap();
        assert_eq!(domain.as_str(), "example.com");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Domain::parse("").is_err());
        assert!(Domain::parse("   ").is_err());
        assert!(Domain::parse("example..com").is_err());
        assert!(Domain::parse("exa mple.com").is_err());
        assert!(Domain::parse("-example.com").is_err());
        assert!(Domain::parse("user@example.com").is_err());
        assert!(Domain::parse(&"a".repeat(64)).is_err());
        assert!(Domain::parse(&format!("{}com", "ab.".repeat(90))).is_err());
    }

    #[test]
    fn test_parse_accepts_underscore_labels() {
        assert!(Domain::parse("_dmarc.example.com").is_ok());
        assert!(Domain::parse("localhost").is_ok());
    }

    #[test]
    fn test_record_names() {
        let domain = Domain::parse("example.com").unwrap();
        assert_eq!(domain.dkim_record("default"), "default._domainkey.example.com");
        assert_eq!(domain.dmarc_record(), "_dmarc.example.com");
    }

    #[test]
    fn test_domain_serde() {
        let domain = Domain::new("serde.example.com");
        let serialized = serde_json::to_string(&domain).unwrap();
        assert_eq!(serialized, "\"serde.example.com\"");

        let deserialized: Domain = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, domain);
    }

    #[test]
    fn test_domain_deref() {
        let domain = Domain::new("deref.example.com");
        assert_eq!(domain.len(), "deref.example.com".len());
        assert!(domain.ends_with(".com"));
    }
}
