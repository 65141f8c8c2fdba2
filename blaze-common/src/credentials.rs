use std::fmt::{self, Debug};

use serde::{Deserialize, Serialize};

/// A username/password pair used for PLAIN authentication.
///
/// The password is never printed by `Debug`, so credentials can sit inside
/// configuration structs that get logged.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Compare a presented identity against these credentials.
    ///
    /// Every byte of both values is inspected regardless of where the first
    /// mismatch occurs.
    #[must_use]
    pub fn matches(&self, username: &str, password: &str) -> bool {
        let user_ok = constant_time_eq(self.username.as_bytes(), username.as_bytes());
        let pass_ok = constant_time_eq(self.password.as_bytes(), password.as_bytes());
        user_ok & pass_ok
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn constant_time_eq(expected: &[u8], presented: &[u8]) -> bool {
    let mut diff = expected.len() ^ presented.len();
    for (i, byte) in presented.iter().enumerate() {
        let other = expected.get(i).copied().unwrap_or(!*byte);
        diff |= usize::from(other ^ byte);
    }
    diff == 0
}
