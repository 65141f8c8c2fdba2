use std::{sync::Arc, time::Duration};

use blaze_common::{TrustPolicy, traits::relay::MessageRelay};
use blaze_delivery::{DomainVerifier, SenderGate};

use crate::{
    claims::{TokenError, TokenIssuer},
    config::ApiConfig,
    rate_limiter::RateLimiter,
    request::SubmissionLimits,
};

/// Everything the request handlers share.
pub struct ApiState {
    pub config: ApiConfig,
    pub tokens: TokenIssuer,
    pub limiter: RateLimiter,
    pub verifier: DomainVerifier,
    pub gate: SenderGate,
    /// Policy `/api/verify` reports `trusted` against
    pub domain_policy: TrustPolicy,
    pub relay: Arc<dyn MessageRelay>,
    /// Host ordinary submissions are relayed to
    pub destination: String,
}

impl ApiState {
    /// # Errors
    ///
    /// [`TokenError::MissingSecret`] if no JWT secret is configured.
    pub fn new(
        config: ApiConfig,
        verifier: DomainVerifier,
        gate: SenderGate,
        relay: Arc<dyn MessageRelay>,
    ) -> Result<Self, TokenError> {
        let tokens = TokenIssuer::new(
            &config.jwt_secret,
            Duration::from_secs(config.token_ttl_secs),
        )?;
        let limiter = RateLimiter::new(config.rate_limit);

        Ok(Self {
            config,
            tokens,
            limiter,
            verifier,
            gate,
            domain_policy: TrustPolicy::All,
            relay,
            destination: String::new(),
        })
    }

    #[must_use]
    pub fn with_domain_policy(mut self, policy: TrustPolicy) -> Self {
        self.domain_policy = policy;
        self
    }

    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    #[must_use]
    pub const fn limits(&self) -> SubmissionLimits {
        SubmissionLimits {
            max_subject_len: self.config.max_subject_len,
            max_body_len: self.config.max_body_len,
        }
    }
}
