//! SASL PLAIN (RFC 4616) decoding.

use base64::{Engine, engine::general_purpose::STANDARD};
use blaze_common::{Credentials, GatewayError};

/// Decode a PLAIN response: `base64([authzid] NUL authcid NUL password)`.
///
/// The authorization identity, if any, is ignored.
///
/// # Errors
///
/// [`GatewayError::Authentication`] if the response is not valid base64 or
/// doesn't have the PLAIN layout.
pub fn decode_plain(response: &str) -> Result<Credentials, GatewayError> {
    let decoded = STANDARD
        .decode(response.trim())
        .map_err(|_| GatewayError::Authentication("malformed PLAIN response".to_string()))?;

    let parts = decoded.split(|&b| b == 0).collect::<Vec<_>>();
    let (username, password) = match parts.as_slice() {
        [_, authcid, password] => (authcid, password),
        [authcid, password] => (authcid, password),
        _ => {
            return Err(GatewayError::Authentication(
                "malformed PLAIN response".to_string(),
            ));
        }
    };

    Ok(Credentials::new(
        String::from_utf8_lossy(username),
        String::from_utf8_lossy(password),
    ))
}

/// Encode `credentials` as a PLAIN initial response.
#[must_use]
pub fn encode_plain(credentials: &Credentials) -> String {
    STANDARD.encode(format!(
        "\0{}\0{}",
        credentials.username, credentials.password
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn decodes_with_and_without_authzid() {
        let creds = decode_plain("AGFsaWNlAHNlY3JldA==").unwrap();
        assert_eq!(creds, Credentials::new("alice", "secret"));

        let creds = decode_plain(&STANDARD.encode("admin\0alice\0secret")).unwrap();
        assert_eq!(creds, Credentials::new("alice", "secret"));

        let creds = decode_plain(&STANDARD.encode("alice\0secret")).unwrap();
        assert_eq!(creds, Credentials::new("alice", "secret"));
    }

    #[test]
    fn rejects_malformed() {
        assert!(matches!(
            decode_plain("!!not base64!!"),
            Err(GatewayError::Authentication(_))
        ));
        assert!(matches!(
            decode_plain(&STANDARD.encode("no separators")),
            Err(GatewayError::Authentication(_))
        ));
    }

    #[test]
    fn encode_matches_decode() {
        let creds = Credentials::new("relay@example.com", "p@ss");
        assert_eq!(decode_plain(&encode_plain(&creds)).unwrap(), creds);
    }
}
