use core::fmt::{self, Display};

use serde::Deserialize;

/// Optional SMTP service extensions advertised in the EHLO reply.
///
/// `AUTH PLAIN` and `SIZE` are always advertised and are not listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extension {
    /// 8BITMIME (RFC 6152)
    EightBitMime,
    /// SMTPUTF8 (RFC 6531)
    SmtpUtf8,
    /// BINARYMIME (RFC 3030)
    BinaryMime,
    /// Delivery status notifications (RFC 3461)
    Dsn,
}

impl Extension {
    /// Extensions enabled when the configuration doesn't list any.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![Self::EightBitMime, Self::SmtpUtf8]
    }
}

impl Display for Extension {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        fmt.write_str(match self {
            Self::EightBitMime => "8BITMIME",
            Self::SmtpUtf8 => "SMTPUTF8",
            Self::BinaryMime => "BINARYMIME",
            Self::Dsn => "DSN",
        })
    }
}
