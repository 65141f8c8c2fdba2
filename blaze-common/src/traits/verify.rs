use async_trait::async_trait;

use crate::{address::Address, error::GatewayError, trust::TrustReport};

/// Decides whether a sender address may submit mail.
#[async_trait]
pub trait SenderVerifier: Send + Sync {
    ///
    /// Verify the domain of `sender` against the configured sender policy.
    ///
    /// # Errors
    /// [`GatewayError::TrustVerification`] when the policy is not met
    ///
    async fn verify_sender(&self, sender: &Address) -> Result<TrustReport, GatewayError>;
}
