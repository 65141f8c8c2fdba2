//! Parsing of submitted message data.
//!
//! [`parse`] turns the raw bytes collected by DATA into a [`Message`]:
//! the first `From` address, every `To` address, the decoded `Subject` and
//! the body. A subject whose encoded words can't be decoded is kept verbatim
//! and the decoding error is returned next to the message instead of failing
//! the parse.

use base64::{Engine, engine::general_purpose::STANDARD};
use encoding_rs::Encoding;
use mailparse::{MailAddr, MailHeader, MailHeaderMap, addrparse_header, parse_headers};
use thiserror::Error;

use crate::error::GatewayError;

/// Marker that classifies a message as HTML.
const HTML_CONTENT_TYPE: &[u8] = b"content-type: text/html";

/// Failure to decode an RFC 2047 encoded word.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown charset '{0}'")]
    UnknownCharset(String),

    #[error("unknown encoding '{0}'")]
    UnknownEncoding(String),

    #[error("invalid base64 in encoded word: {0}")]
    InvalidBase64(String),

    #[error("invalid quoted-printable escape '{0}'")]
    InvalidEscape(String),
}

/// A parsed, immutable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    sender: Option<String>,
    recipients: Vec<String>,
    subject: String,
    body: String,
    size: usize,
    html: bool,
}

impl Message {
    /// First address of the `From` header, if any
    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    /// Every address of the `To` header, in order
    #[must_use]
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Size of the raw data the message was parsed from
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Whether the header block declares an HTML content type.
    ///
    /// This is a substring test on the raw headers, not MIME parsing.
    #[must_use]
    pub const fn is_html(&self) -> bool {
        self.html
    }
}

/// The result of [`parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parsed {
    pub message: Message,
    /// Set when the subject could not be decoded and was kept raw
    pub subject_error: Option<DecodeError>,
}

/// Parse raw message data.
///
/// Accepts CRLF and bare LF line endings.
///
/// # Errors
///
/// Returns [`GatewayError::Validation`] if the header block can't be parsed.
pub fn parse(raw: &[u8]) -> Result<Parsed, GatewayError> {
    let (headers, body_offset) =
        parse_headers(raw).map_err(|err| GatewayError::Validation(err.to_string()))?;

    let sender = headers
        .get_first_header("From")
        .and_then(|header| header_addresses(header).into_iter().next());

    let recipients = headers
        .get_all_headers("To")
        .into_iter()
        .flat_map(header_addresses)
        .collect();

    let raw_subject = headers
        .get_first_header("Subject")
        .map(|header| unfold(header.get_value_raw()))
        .unwrap_or_default();

    let (subject, subject_error) = match decode_encoded_words(&raw_subject) {
        Ok(decoded) => (decoded, None),
        Err(err) => (raw_subject, Some(err)),
    };

    let header_block = &raw[..body_offset.min(raw.len())];
    let html = header_block
        .to_ascii_lowercase()
        .windows(HTML_CONTENT_TYPE.len())
        .any(|window| window == HTML_CONTENT_TYPE);

    let body = raw
        .get(body_offset..)
        .map(|body| String::from_utf8_lossy(body).into_owned())
        .unwrap_or_default();

    Ok(Parsed {
        message: Message {
            sender,
            recipients,
            subject,
            body,
            size: raw.len(),
            html,
        },
        subject_error,
    })
}

fn header_addresses(header: &MailHeader<'_>) -> Vec<String> {
    let Ok(list) = addrparse_header(header) else {
        return Vec::new();
    };

    list.iter()
        .flat_map(|addr| match addr {
            MailAddr::Single(single) => vec![single.addr.clone()],
            MailAddr::Group(group) => group.addrs.iter().map(|s| s.addr.clone()).collect(),
        })
        .collect()
}

fn unfold(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .replace("\r\n", "")
        .replace('\n', "")
        .trim()
        .to_string()
}

/// Decode every RFC 2047 encoded word in a header value.
///
/// Text that merely looks like the start of an encoded word is passed
/// through untouched. Whitespace between two adjacent encoded words is
/// dropped.
///
/// # Errors
///
/// Returns a [`DecodeError`] when a well-formed encoded word names an
/// unknown charset or encoding, or carries an invalid payload.
pub fn decode_encoded_words(input: &str) -> Result<String, DecodeError> {
    let mut decoded = String::with_capacity(input.len());
    let mut rest = input;
    let mut previous_was_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);

        if let Some((word, consumed)) = EncodedWord::split(candidate) {
            if !(previous_was_word && before.chars().all(char::is_whitespace)) {
                decoded.push_str(before);
            }
            decoded.push_str(&word.decode()?);
            rest = &candidate[consumed..];
            previous_was_word = true;
        } else {
            decoded.push_str(before);
            decoded.push_str("=?");
            rest = &candidate[2..];
            previous_was_word = false;
        }
    }

    decoded.push_str(rest);
    Ok(decoded)
}

struct EncodedWord<'a> {
    charset: &'a str,
    encoding: &'a str,
    text: &'a str,
}

impl<'a> EncodedWord<'a> {
    /// Split a `=?charset?encoding?text?=` token off the front of `input`,
    /// returning it with the number of bytes it spans.
    fn split(input: &'a str) -> Option<(Self, usize)> {
        let inner = input.strip_prefix("=?")?;
        let (charset, inner) = inner.split_once('?')?;
        let (encoding, inner) = inner.split_once('?')?;
        let end = inner.find("?=")?;
        let text = &inner[..end];

        let malformed = charset.is_empty()
            || encoding.len() != 1
            || charset.contains(char::is_whitespace)
            || text.contains(char::is_whitespace);
        if malformed {
            return None;
        }

        let consumed = 2 + charset.len() + 1 + encoding.len() + 1 + end + 2;
        Some((
            Self {
                charset,
                encoding,
                text,
            },
            consumed,
        ))
    }

    fn decode(&self) -> Result<String, DecodeError> {
        // RFC 2231 allows a language suffix: charset*lang
        let label = self.charset.split('*').next().unwrap_or(self.charset);
        let charset = Encoding::for_label(label.as_bytes())
            .ok_or_else(|| DecodeError::UnknownCharset(self.charset.to_string()))?;

        let bytes = match self.encoding {
            "B" | "b" => STANDARD
                .decode(self.text)
                .map_err(|err| DecodeError::InvalidBase64(err.to_string()))?,
            "Q" | "q" => decode_q(self.text)?,
            other => return Err(DecodeError::UnknownEncoding(other.to_string())),
        };

        let (text, _) = charset.decode_without_bom_handling(&bytes);
        Ok(text.into_owned())
    }
}

fn decode_q(text: &str) -> Result<Vec<u8>, DecodeError> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'_' => out.push(b' '),
            b'=' => {
                let escape = bytes
                    .get(i + 1..i + 3)
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());

                let Some(byte) = escape else {
                    let end = (i + 3).min(bytes.len());
                    return Err(DecodeError::InvalidEscape(
                        String::from_utf8_lossy(&bytes[i..end]).into_owned(),
                    ));
                };
                out.push(byte);
                i += 2;
            }
            other => out.push(other),
        }
        i += 1;
    }

    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_headers_and_body() {
        let raw = b"From: Alice <alice@example.com>\r\n\
                    To: bob@example.org, Carol <carol@example.net>\r\n\
                    Subject: Quarterly numbers\r\n\
                    \r\n\
                    First line\r\n\
                    Second line\r\n";

        let parsed = parse(raw).unwrap();
        let message = parsed.message;

        assert!(parsed.subject_error.is_none());
        assert_eq!(message.sender(), Some("alice@example.com"));
        assert_eq!(
            message.recipients(),
            &["bob@example.org".to_string(), "carol@example.net".to_string()]
        );
        assert_eq!(message.subject(), "Quarterly numbers");
        assert_eq!(message.body(), "First line\r\nSecond line\r\n");
        assert_eq!(message.size(), raw.len());
        assert!(!message.is_html());
    }

    #[test]
    fn accepts_bare_lf_and_long_bodies() {
        let body = "line\n".repeat(5_000);
        let raw = format!("From: a@example.com\nSubject: lf\n\n{body}");

        let message = parse(raw.as_bytes()).unwrap().message;
        assert_eq!(message.subject(), "lf");
        assert_eq!(message.body(), body);
    }

    #[test]
    fn decodes_q_encoded_subject() {
        let raw = b"Subject: =?UTF-8?Q?Caf=C3=A9_=C3=A0_la_plage_o=C3=B9?=\r\n\r\nbody";

        let parsed = parse(raw).unwrap();
        assert!(parsed.subject_error.is_none());
        assert_eq!(parsed.message.subject(), "Caf\u{e9} \u{e0} la plage o\u{f9}");
    }

    #[test]
    fn malformed_subject_is_kept_raw() {
        let raw = b"Subject: =?Invalid?Q?Test?=\r\n\r\nbody";

        let parsed = parse(raw).unwrap();
        assert_eq!(parsed.message.subject(), "=?Invalid?Q?Test?=");
        assert_eq!(
            parsed.subject_error,
            Some(DecodeError::UnknownCharset("Invalid".to_string()))
        );
        assert_eq!(parsed.message.body(), "body");
    }

    #[test]
    fn decodes_adjacent_words_and_base64() {
        assert_eq!(
            decode_encoded_words("=?ISO-8859-1?Q?a?= =?UTF-8?B?w6k=?= end").unwrap(),
            "a\u{e9} end"
        );
        assert_eq!(decode_encoded_words("plain =? text").unwrap(), "plain =? text");
        assert!(matches!(
            decode_encoded_words("=?UTF-8?Q?bad=ZZ?="),
            Err(DecodeError::InvalidEscape(_))
        ));
        assert!(matches!(
            decode_encoded_words("=?UTF-8?X?abc?="),
            Err(DecodeError::UnknownEncoding(_))
        ));
    }

    #[test]
    fn folded_subject_is_unfolded() {
        let raw = b"Subject: a long\r\n subject line\r\n\r\n";
        assert_eq!(parse(raw).unwrap().message.subject(), "a long subject line");
    }

    #[test]
    fn detects_html_in_header_block_only() {
        let html = b"Content-Type: text/html; charset=UTF-8\r\n\r\n<p>hi</p>";
        assert!(parse(html).unwrap().message.is_html());

        let mixed_case = b"content-TYPE: TEXT/HTML\r\n\r\n<p>hi</p>";
        assert!(parse(mixed_case).unwrap().message.is_html());

        let in_body = b"Subject: x\r\n\r\nContent-Type: text/html";
        assert!(!parse(in_body).unwrap().message.is_html());
    }
}
