use async_trait::async_trait;
use blaze_common::{
    Address, GatewayError, TrustPolicy, TrustReport, internal, traits::verify::SenderVerifier,
};

use crate::verifier::DomainVerifier;

/// Accepts a sender only if its domain satisfies the sender policy.
#[derive(Clone)]
pub struct SenderGate {
    verifier: DomainVerifier,
    policy: TrustPolicy,
}

impl SenderGate {
    #[must_use]
    pub const fn new(verifier: DomainVerifier, policy: TrustPolicy) -> Self {
        Self { verifier, policy }
    }

    #[must_use]
    pub const fn policy(&self) -> &TrustPolicy {
        &self.policy
    }

    /// Verify the sender of a raw e-mail address.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Validation`] if `email` isn't `local@domain`, otherwise
    /// as [`SenderVerifier::verify_sender`].
    pub async fn verify_email(&self, email: &str) -> Result<TrustReport, GatewayError> {
        let address = Address::parse(email)?;
        self.verify_sender(&address).await
    }
}

#[async_trait]
impl SenderVerifier for SenderGate {
    async fn verify_sender(&self, sender: &Address) -> Result<TrustReport, GatewayError> {
        let report = self.verifier.verify(sender.domain().as_str()).await?;

        if report.satisfies(&self.policy) {
            Ok(report)
        } else {
            internal!(
                level = DEBUG,
                "Sender {sender} fails {} policy: {}",
                self.policy.name(),
                report.summary()
            );
            Err(GatewayError::TrustVerification(Box::new(report)))
        }
    }
}
