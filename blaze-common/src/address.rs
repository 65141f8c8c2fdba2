use std::{
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{domain::Domain, error::GatewayError};

/// A validated `local@domain` mailbox.
///
/// Angle brackets and surrounding whitespace are stripped before parsing, so
/// both `user@example.com` and `<user@example.com>` are accepted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    local_part: String,
    domain: Domain,
}

impl Address {
    /// Split an address into its local part and domain.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] unless the input contains exactly
    /// one `@` with a non-empty local part and a valid domain.
    pub fn parse(input: &str) -> Result<Self, GatewayError> {
        let trimmed = input.trim();
        let trimmed = trimmed
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .unwrap_or(trimmed);

        let mut parts = trimmed.split('@');
        let (Some(local_part), Some(domain), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(GatewayError::Validation(format!(
                "'{trimmed}' is not a valid e-mail address"
            )));
        };

        if local_part.is_empty() || local_part.chars().any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(GatewayError::Validation(format!(
                "'{trimmed}' has an invalid local part"
            )));
        }

        Ok(Self {
            local_part: local_part.to_string(),
            domain: Domain::parse(domain)?,
        })
    }

    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    #[must_use]
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

impl FromStr for Address {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = GatewayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_and_bracketed() {
        let plain = Address::parse("alice@Example.com").unwrap();
        assert_eq!(plain.local_part(), "alice");
        assert_eq!(plain.domain().as_str(), "example.com");
        assert_eq!(plain.to_string(), "alice@example.com");

        let bracketed: Address = " <bob@example.org> ".parse().unwrap();
        assert_eq!(bracketed.to_string(), "bob@example.org");
    }

    #[test]
    fn parse_requires_exactly_one_at() {
        for bad in ["", "alice", "@example.com", "alice@", "a@b@example.com", "a b@example.com"] {
            let err = Address::parse(bad).unwrap_err();
            assert!(err.is_validation(), "{bad} should fail validation");
        }
    }

    #[test]
    fn serde_uses_string_form() {
        let address = Address::parse("carol@example.net").unwrap();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"carol@example.net\"");

        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);

        assert!(serde_json::from_str::<Address>("\"nope\"").is_err());
    }
}
