use core::fmt::{self, Display, Formatter};

use ahash::AHashMap;
use blaze_common::Address;

/// ESMTP parameters of a MAIL FROM command (RFC 5321 Section 3.3).
///
/// Keys are normalised to uppercase. Only `SIZE` is interpreted by the
/// gateway; the others are accepted and ignored.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct MailParameters {
    params: AHashMap<String, Option<String>>,
}

impl MailParameters {
    /// Parses parameter tokens in the form `KEY=VALUE` or `FLAG`.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if a parameter appears twice or
    /// `SIZE` is not a positive number.
    pub fn from_params_str(params_str: &str) -> Result<Self, String> {
        let mut params = AHashMap::new();

        for token in params_str.split_whitespace() {
            let (key, value) = token
                .split_once('=')
                .map_or((token, None), |(key, value)| (key, Some(value.to_string())));
            let key = key.to_ascii_uppercase();

            let positive = value
                .as_deref()
                .and_then(|v| v.parse::<usize>().ok())
                .is_some_and(|v| v > 0);
            if key == "SIZE" && !positive {
                return Err(format!("Invalid SIZE value: {}", value.unwrap_or_default()));
            }

            if params.insert(key.clone(), value).is_some() {
                return Err(format!("Duplicate parameter '{key}' not allowed"));
            }
        }

        Ok(Self { params })
    }

    /// Sets `key` to `value`, replacing any previous value.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.params.insert(key.to_ascii_uppercase(), Some(value.into()));
    }

    /// Gets a parameter value by key (case-insensitive).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(&key.to_ascii_uppercase())?.as_deref()
    }

    /// The declared message size, if present.
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        self.get("SIZE")?.parse().ok()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl Display for MailParameters {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.params {
            if !first {
                f.write_str(" ")?;
            }
            first = false;

            match v {
                None => f.write_str(k)?,
                Some(val) => write!(f, "{k}={val}")?,
            }
        }
        Ok(())
    }
}

#[derive(PartialEq, Eq, Hash, Debug, Clone)]
pub enum HeloVariant {
    Ehlo(String),
    Helo(String),
}

impl Display for HeloVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ehlo(id) => write!(f, "EHLO {id}"),
            Self::Helo(id) => write!(f, "HELO {id}"),
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Command {
    Helo(HeloVariant),
    Auth {
        mechanism: String,
        initial: Option<String>,
    },
    MailFrom(Address, MailParameters),
    /// RCPT parameters are accepted and ignored
    RcptTo(Address),
    Data,
    Rset,
    Noop,
    Quit,
    /// A recognised command whose arguments could not be parsed
    Malformed {
        verb: &'static str,
        reason: String,
    },
    Invalid(String),
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(v) => v.fmt(fmt),
            // Never echo the initial response, it carries the password
            Self::Auth { mechanism, .. } => write!(fmt, "AUTH {mechanism}"),
            Self::MailFrom(from, params) if params.is_empty() => write!(fmt, "MAIL FROM:<{from}>"),
            Self::MailFrom(from, params) => write!(fmt, "MAIL FROM:<{from}> {params}"),
            Self::RcptTo(to) => write!(fmt, "RCPT TO:<{to}>"),
            Self::Data => fmt.write_str("DATA"),
            Self::Rset => fmt.write_str("RSET"),
            Self::Noop => fmt.write_str("NOOP"),
            Self::Quit => fmt.write_str("QUIT"),
            Self::Malformed { verb, reason } => write!(fmt, "{verb} ({reason})"),
            Self::Invalid(s) => fmt.write_str(s),
        }
    }
}

/// Strip a case-insensitive `prefix` from `input`.
fn strip_verb<'a>(input: &'a str, prefix: &str) -> Option<&'a str> {
    input
        .get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &input[prefix.len()..])
}

fn parse_path(verb: &'static str, path: &str) -> Result<Address, Command> {
    let path = path.trim();
    if path == "<>" {
        return Err(Command::Malformed {
            verb,
            reason: "null reverse-path is not accepted".to_string(),
        });
    }

    Address::parse(path).map_err(|err| Command::Malformed {
        verb,
        reason: err.to_string(),
    })
}

impl TryFrom<&str> for Command {
    type Error = Self;

    fn try_from(command: &str) -> Result<Self, Self::Error> {
        let trimmed = command.trim();

        if let Some(rest) = strip_verb(trimmed, "MAIL FROM:") {
            let rest = rest.trim();
            let (path, params) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));

            let params = MailParameters::from_params_str(params).map_err(|reason| Self::Malformed {
                verb: "MAIL",
                reason,
            })?;

            return Ok(Self::MailFrom(parse_path("MAIL", path)?, params));
        }

        if let Some(rest) = strip_verb(trimmed, "RCPT TO:") {
            let rest = rest.trim();
            let path = rest.split_once(char::is_whitespace).map_or(rest, |(path, _)| path);
            return Ok(Self::RcptTo(parse_path("RCPT", path)?));
        }

        let (verb, argument) = trimmed
            .split_once(char::is_whitespace)
            .map_or((trimmed, ""), |(verb, argument)| (verb, argument.trim()));

        match verb.to_ascii_uppercase().as_str() {
            "EHLO" | "HELO" if argument.is_empty() => Err(Self::Malformed {
                verb: "EHLO",
                reason: "expected a hostname".to_string(),
            }),
            "EHLO" => Ok(Self::Helo(HeloVariant::Ehlo(argument.to_string()))),
            "HELO" => Ok(Self::Helo(HeloVariant::Helo(argument.to_string()))),
            "AUTH" => {
                let mut parts = argument.split_whitespace();
                parts.next().map_or_else(
                    || {
                        Err(Self::Malformed {
                            verb: "AUTH",
                            reason: "expected a mechanism".to_string(),
                        })
                    },
                    |mechanism| {
                        Ok(Self::Auth {
                            mechanism: mechanism.to_ascii_uppercase(),
                            initial: parts.next().map(str::to_string),
                        })
                    },
                )
            }
            "DATA" => Ok(Self::Data),
            "RSET" => Ok(Self::Rset),
            "NOOP" => Ok(Self::Noop),
            "QUIT" => Ok(Self::Quit),
            _ => Err(Self::Invalid(trimmed.to_owned())),
        }
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = Self;

    fn try_from(command: &[u8]) -> Result<Self, Self::Error> {
        std::str::from_utf8(command).map_or_else(
            |_| Err(Self::Invalid("Unable to interpret command".to_string())),
            Self::try_from,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(line: &str) -> Command {
        Command::try_from(line).unwrap_or_else(|e| e)
    }

    #[test]
    fn helo() {
        assert_eq!(
            parse("EHLO client.example.com\r\n"),
            Command::Helo(HeloVariant::Ehlo("client.example.com".to_string()))
        );
        assert_eq!(
            parse("helo relay"),
            Command::Helo(HeloVariant::Helo("relay".to_string()))
        );
        assert!(matches!(parse("EHLO"), Command::Malformed { .. }));
    }

    #[test]
    fn mail_from_with_size() {
        let command = parse("mail from:<alice@example.com> SIZE=1024 BODY=8BITMIME");
        let Command::MailFrom(from, params) = command else {
            panic!("expected MAIL FROM, got {command:?}");
        };

        assert_eq!(from.to_string(), "alice@example.com");
        assert_eq!(params.size(), Some(1024));
        assert_eq!(params.get("body"), Some("8BITMIME"));
    }

    #[test]
    fn mail_from_rejects_bad_input() {
        assert!(matches!(
            parse("MAIL FROM:<>"),
            Command::Malformed { verb: "MAIL", .. }
        ));
        assert!(matches!(
            parse("MAIL FROM:<not-an-address>"),
            Command::Malformed { verb: "MAIL", .. }
        ));
        assert!(matches!(
            parse("MAIL FROM:<a@example.com> SIZE=0"),
            Command::Malformed { verb: "MAIL", .. }
        ));
        assert!(matches!(
            parse("MAIL FROM:<a@example.com> SIZE=1 size=2"),
            Command::Malformed { verb: "MAIL", .. }
        ));
    }

    #[test]
    fn rcpt_to_ignores_parameters() {
        assert_eq!(
            parse("RCPT TO:<bob@example.org> NOTIFY=NEVER"),
            Command::RcptTo(Address::parse("bob@example.org").unwrap())
        );
    }

    #[test]
    fn auth() {
        assert_eq!(
            parse("AUTH plain AGFsaWNlAHNlY3JldA=="),
            Command::Auth {
                mechanism: "PLAIN".to_string(),
                initial: Some("AGFsaWNlAHNlY3JldA==".to_string()),
            }
        );
        assert_eq!(
            parse("AUTH LOGIN"),
            Command::Auth {
                mechanism: "LOGIN".to_string(),
                initial: None,
            }
        );
        assert_eq!(parse("AUTH PLAIN AGFsaWNlAHNlY3JldA==").to_string(), "AUTH PLAIN");
    }

    #[test]
    fn simple_verbs() {
        assert_eq!(parse("DATA"), Command::Data);
        assert_eq!(parse("rset"), Command::Rset);
        assert_eq!(parse("NoOp"), Command::Noop);
        assert_eq!(parse("QUIT\r\n"), Command::Quit);
        assert_eq!(parse("VRFY bob"), Command::Invalid("VRFY bob".to_string()));
        assert_eq!(
            Command::try_from(&b"\xff\xfe"[..]),
            Err(Command::Invalid("Unable to interpret command".to_string()))
        );
    }
}
