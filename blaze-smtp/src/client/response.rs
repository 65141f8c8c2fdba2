use super::error::{ClientError, Result};

/// A complete reply from an SMTP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// 2xx and 3xx replies; 334 and 354 ask the client to carry on.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 400
    }

    /// Pass a successful reply through, turning anything else into
    /// [`ClientError::Rejected`] for `command`.
    ///
    /// # Errors
    ///
    /// If the reply is a 4xx or 5xx.
    pub fn ensure(self, command: &'static str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ClientError::Rejected {
                command,
                code: self.code,
                message: self.message(),
            })
        }
    }

    /// Split one reply line into its code, whether it is the last line, and
    /// its text.
    fn parse_line(line: &str) -> Result<(u16, bool, &str)> {
        let code = line
            .get(..3)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| ClientError::ParseError(format!("Invalid status line: '{line}'")))?;

        match line.as_bytes().get(3) {
            None => Ok((code, true, "")),
            Some(b' ') => Ok((code, true, &line[4..])),
            Some(b'-') => Ok((code, false, &line[4..])),
            Some(c) => Err(ClientError::ParseError(format!(
                "Invalid separator character: '{}'",
                char::from(*c)
            ))),
        }
    }

    /// Parse one reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes it occupied, or `None` if
    /// the buffer doesn't yet hold a complete reply.
    ///
    /// # Errors
    ///
    /// Fails on a malformed line or if the code changes mid-reply.
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let (line_code, last, text) = Self::parse_line(std::str::from_utf8(raw)?)?;
            match code {
                None => code = Some(line_code),
                Some(expected) if expected != line_code => {
                    return Err(ClientError::ParseError(format!(
                        "Status code mismatch in multi-line response: expected {expected}, got {line_code}"
                    )));
                }
                Some(_) => {}
            }
            lines.push(text.to_string());

            if last {
                return Ok(code.map(|code| (Self::new(code, lines), consumed)));
            }
        }

        Ok(None)
    }
}
