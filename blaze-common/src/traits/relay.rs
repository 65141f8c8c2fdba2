use async_trait::async_trait;

use crate::{address::Address, error::GatewayError};

/// One message on its way to a single recipient.
#[derive(Debug, Clone, Copy)]
pub struct Outgoing<'a> {
    pub from: &'a Address,
    pub to: &'a Address,
    pub subject: &'a str,
    pub body: &'a str,
}

/// Hands finished messages to an upstream SMTP server.
#[async_trait]
pub trait MessageRelay: Send + Sync {
    ///
    /// Relay `message` through the default profile to `destination`.
    ///
    /// # Errors
    /// A [`GatewayError`] describing which step of the relay failed
    ///
    async fn send(
        &self,
        message: &Outgoing<'_>,
        html: bool,
        destination: &str,
    ) -> Result<(), GatewayError>;

    ///
    /// Relay `message` through the verified-sender profile, setting `Reply-To`.
    ///
    /// # Errors
    /// A [`GatewayError`] describing which step of the relay failed
    ///
    async fn send_with_verified_sender(
        &self,
        message: &Outgoing<'_>,
        reply_to: &str,
    ) -> Result<(), GatewayError>;
}
