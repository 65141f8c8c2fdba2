//! Outbound SMTP client used to relay accepted messages upstream.

mod client;
mod error;
mod response;

pub use client::{SmtpClient, encode_data};
pub use error::{ClientError, Result};
pub use response::Response;
