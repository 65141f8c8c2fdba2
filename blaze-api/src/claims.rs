//! HS256 JSON Web Tokens carrying an API user's identity.
//!
//! A token is `base64url(header).base64url(payload).base64url(signature)`,
//! unpadded, where the signature is HMAC-SHA256 over the first two parts.

use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use blaze_common::GatewayError;
use chrono::{DateTime, Utc};
use ring::hmac;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ALGORITHM: &str = "HS256";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("no signing secret configured")]
    MissingSecret,

    #[error("malformed token: {0}")]
    Malformed(&'static str),

    #[error("unsupported algorithm {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("token not valid yet")]
    NotYetValid,

    #[error("token expired")]
    Expired,

    #[error("unknown user")]
    UnknownUser,

    #[error("wrong password")]
    WrongPassword,

    #[error("unable to encode token: {0}")]
    Encoding(String),
}

impl From<TokenError> for GatewayError {
    fn from(err: TokenError) -> Self {
        match err {
            // Don't reveal which half of the login was wrong
            TokenError::UnknownUser | TokenError::WrongPassword => {
                Self::Authentication("invalid email or password".to_string())
            }
            TokenError::MissingSecret | TokenError::Encoding(_) => {
                Self::Protocol(format!("unable to issue token: {err}"))
            }
            other => Self::Authentication(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// The identity a token vouches for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub email: String,
    pub domain: String,
    /// Issued at, seconds since the epoch
    pub iat: i64,
    /// Not valid before
    pub nbf: i64,
    /// Expires at
    pub exp: i64,
}

impl Claims {
    /// Whether `from` may be used as a verified sender under these claims:
    /// either the user's own address or any address in the user's domain.
    #[must_use]
    pub fn permits_sender(&self, from: &str) -> bool {
        let from = from.trim();
        if from.eq_ignore_ascii_case(&self.email) {
            return true;
        }

        from.rsplit_once('@')
            .is_some_and(|(_, domain)| domain.eq_ignore_ascii_case(&self.domain))
    }
}

/// Signs and checks claims with one shared secret.
pub struct TokenIssuer {
    key: hmac::Key,
    ttl: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer").field("ttl", &self.ttl).finish()
    }
}

impl TokenIssuer {
    /// # Errors
    ///
    /// [`TokenError::MissingSecret`] if `secret` is empty.
    pub fn new(secret: &str, ttl: Duration) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::MissingSecret);
        }

        Ok(Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
            ttl,
        })
    }

    /// Issue a token for `email` in `domain`, valid from now.
    ///
    /// # Errors
    ///
    /// [`TokenError::Encoding`] if the claims can't be serialized.
    pub fn issue(&self, email: &str, domain: &str) -> Result<String, TokenError> {
        self.issue_at(email, domain, Utc::now())
    }

    /// # Errors
    ///
    /// See [`issue`](Self::issue).
    pub fn issue_at(
        &self,
        email: &str,
        domain: &str,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let iat = now.timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            email: email.to_string(),
            domain: domain.to_string(),
            iat,
            nbf: iat,
            exp: iat.saturating_add(ttl),
        };

        self.sign(&claims)
    }

    /// Issue a fresh token for the identity in `claims`.
    ///
    /// # Errors
    ///
    /// See [`issue`](Self::issue).
    pub fn refresh(&self, claims: &Claims) -> Result<String, TokenError> {
        self.issue(&claims.email, &claims.domain)
    }

    /// Check the token's signature, algorithm and validity window.
    ///
    /// # Errors
    ///
    /// The first check the token fails.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_at(token, Utc::now())
    }

    /// # Errors
    ///
    /// See [`validate`](Self::validate).
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let token = token.trim();
        let Some((signed, signature)) = token.rsplit_once('.') else {
            return Err(TokenError::Malformed("expected three segments"));
        };
        let Some((header, payload)) = signed.split_once('.').filter(|(_, p)| !p.contains('.')) else {
            return Err(TokenError::Malformed("expected three segments"));
        };

        let header: Header = decode_segment(header)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::UnsupportedAlgorithm(header.alg));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed("signature is not base64url"))?;
        hmac::verify(&self.key, signed.as_bytes(), &signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let claims: Claims = decode_segment(payload)?;
        let now = now.timestamp();
        if now < claims.nbf {
            return Err(TokenError::NotYetValid);
        }
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let header = Header {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        };

        let header = encode_segment(&header)?;
        let payload = encode_segment(claims)?;
        let signed = format!("{header}.{payload}");
        let tag = hmac::sign(&self.key, signed.as_bytes());

        Ok(format!("{signed}.{}", URL_SAFE_NO_PAD.encode(tag.as_ref())))
    }
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value).map_err(|err| TokenError::Encoding(err.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::Malformed("segment is not base64url"))?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed("segment is not valid JSON"))
}
