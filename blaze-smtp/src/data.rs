//! Reading the DATA section of a transaction.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use blaze_common::{Capacity, GatewayError};

use crate::config::Limits;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("message exceeds maximum size of {limit} bytes")]
    TooLarge { limit: usize },

    #[error("line exceeds {limit} characters")]
    LineTooLong { limit: usize },

    #[error("connection closed before end of data")]
    UnexpectedEof,

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl DataError {
    /// Whether the client is still mid-transfer, so the rest of the data
    /// has to be discarded before the next command can be read.
    #[must_use]
    pub const fn needs_discard(&self) -> bool {
        matches!(self, Self::TooLarge { .. } | Self::LineTooLong { .. })
    }
}

impl From<DataError> for GatewayError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::TooLarge { limit } => {
                Self::CapacityExceeded(Capacity::MessageSize { limit })
            }
            DataError::LineTooLong { limit } => {
                Self::Protocol(Capacity::LineLength { limit }.to_string())
            }
            DataError::UnexpectedEof => {
                Self::Network("connection closed before end of data".to_string())
            }
            DataError::Io(err) => Self::Network(err.to_string()),
        }
    }
}

fn is_terminator(line: &[u8]) -> bool {
    matches!(line, b".\r\n" | b".\n")
}

/// Read one line including its terminator, reading at most `limit` bytes.
async fn read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    line: &mut Vec<u8>,
    limit: usize,
) -> Result<(), DataError> {
    line.clear();
    let read = (&mut *reader)
        .take(limit as u64)
        .read_until(b'\n', line)
        .await?;

    if read == 0 {
        return Err(DataError::UnexpectedEof);
    }

    Ok(())
}

/// Read message data up to the lone `.` line.
///
/// A leading dot is removed from lines starting with `..` and every line is
/// stored with a CRLF terminator. Reading stops as soon as the accumulated
/// size would exceed `limits.max_message_size`, before anything more is
/// consumed from `reader`.
///
/// # Errors
///
/// [`DataError::TooLarge`] and [`DataError::LineTooLong`] leave the rest of
/// the transfer unread; see [`discard`].
pub async fn read_body<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    limits: &Limits,
) -> Result<Vec<u8>, DataError> {
    let max_line = limits.max_line_length + 2;
    let mut message = Vec::new();
    let mut line = Vec::with_capacity(256);

    loop {
        read_line(reader, &mut line, max_line).await?;

        if !line.ends_with(b"\n") {
            if line.len() >= max_line {
                return Err(DataError::LineTooLong {
                    limit: limits.max_line_length,
                });
            }
            return Err(DataError::UnexpectedEof);
        }

        if is_terminator(&line) {
            return Ok(message);
        }

        let content = line
            .strip_suffix(b"\r\n")
            .or_else(|| line.strip_suffix(b"\n"))
            .unwrap_or(&line);
        let content = if content.starts_with(b"..") {
            &content[1..]
        } else {
            content
        };

        if message.len() + content.len() + 2 > limits.max_message_size {
            return Err(DataError::TooLarge {
                limit: limits.max_message_size,
            });
        }

        message.extend_from_slice(content);
        message.extend_from_slice(b"\r\n");
    }
}

/// Consume and drop input up to and including the lone `.` line.
///
/// `at_line_start` is `false` when the reader stopped in the middle of a
/// line, as it does after [`DataError::LineTooLong`].
///
/// # Errors
///
/// Fails if the connection closes or errors before the terminator.
pub async fn discard<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    mut at_line_start: bool,
) -> Result<(), DataError> {
    let mut line = Vec::with_capacity(256);
    // Lines longer than this are consumed in chunks
    let chunk = 8192;

    loop {
        read_line(reader, &mut line, chunk).await?;
        let complete = line.ends_with(b"\n");

        if at_line_start && is_terminator(&line) {
            return Ok(());
        }

        at_line_start = complete;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::BufReader;

    use super::*;

    fn limits(max_message_size: usize, max_line_length: usize) -> Limits {
        Limits {
            max_message_size,
            max_recipients: 10,
            max_line_length,
        }
    }

    #[tokio::test]
    async fn unstuffs_dots_and_stops_at_terminator() {
        let input = b"Subject: dots\r\n\r\n..leading dot\r\n.\r\nNEXT COMMAND\r\n";
        let mut reader = BufReader::new(&input[..]);

        let body = read_body(&mut reader, &limits(1024, 100)).await.unwrap();
        assert_eq!(body, b"Subject: dots\r\n\r\n.leading dot\r\n".to_vec());

        let mut rest = String::new();
        reader.read_line(&mut rest).await.unwrap();
        assert_eq!(rest, "NEXT COMMAND\r\n");
    }

    #[tokio::test]
    async fn normalises_bare_lf() {
        let input = b"a\nb\n.\n";
        let body = read_body(&mut BufReader::new(&input[..]), &limits(1024, 100))
            .await
            .unwrap();

        assert_eq!(body, b"a\r\nb\r\n".to_vec());
    }

    #[tokio::test]
    async fn aborts_at_size_limit_without_reading_further() {
        let input = b"0123456789\r\n0123456789\r\nnever read\r\n.\r\n";
        let mut reader = BufReader::new(&input[..]);

        let err = read_body(&mut reader, &limits(16, 100)).await.unwrap_err();
        assert!(matches!(err, DataError::TooLarge { limit: 16 }));
        assert!(err.needs_discard());

        let mut rest = String::new();
        reader.read_line(&mut rest).await.unwrap();
        assert_eq!(rest, "never read\r\n");

        discard(&mut reader, true).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_long_lines() {
        let input = format!("{}\r\n.\r\n", "x".repeat(50));
        let mut reader = BufReader::new(input.as_bytes());

        let err = read_body(&mut reader, &limits(1024, 20)).await.unwrap_err();
        assert!(matches!(err, DataError::LineTooLong { limit: 20 }));

        discard(&mut reader, false).await.unwrap();
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn eof_before_terminator() {
        let input = b"unterminated\r\n";
        let err = read_body(&mut BufReader::new(&input[..]), &limits(1024, 100))
            .await
            .unwrap_err();

        assert!(matches!(err, DataError::UnexpectedEof));
        assert!(matches!(GatewayError::from(err), GatewayError::Network(_)));
    }
}
