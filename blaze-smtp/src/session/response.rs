use core::fmt::{self, Display, Formatter};

use blaze_common::status::Status;

/// A complete, possibly multi-line, SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    status: Status,
    lines: Vec<String>,
}

impl Reply {
    #[must_use]
    pub fn new(status: Status, text: impl Into<String>) -> Self {
        Self {
            status,
            lines: vec![text.into()],
        }
    }

    /// A reply spread over several lines, such as the EHLO capability list.
    #[must_use]
    pub fn multiline(status: Status, lines: Vec<String>) -> Self {
        Self { status, lines }
    }

    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..400).contains(&u32::from(self.status))
    }
}

impl Display for Reply {
    /// Lines are joined with CRLF; the final terminator is left to the writer.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let last = self.lines.len().saturating_sub(1);

        if self.lines.is_empty() {
            return write!(f, "{}", self.status);
        }

        for (idx, line) in self.lines.iter().enumerate() {
            let separator = if idx == last { ' ' } else { '-' };
            write!(f, "{}{separator}{line}", self.status)?;
            if idx != last {
                f.write_str("\r\n")?;
            }
        }

        Ok(())
    }
}
