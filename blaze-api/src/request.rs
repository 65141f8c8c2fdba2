//! Request and response bodies

use std::collections::BTreeMap;

use blaze_common::{Address, Capacity, Check, CheckStatus, GatewayError, TrustPolicy, TrustReport};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// A message submitted through the API.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub html: bool,
}

#[derive(Debug, Deserialize)]
pub struct VerifiedSendRequest {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub reply_to: String,
}

/// Size limits applied to submissions
#[derive(Debug, Clone, Copy)]
pub struct SubmissionLimits {
    pub max_subject_len: usize,
    pub max_body_len: usize,
}

/// Check the sizes and parse both addresses.
///
/// # Errors
///
/// [`GatewayError::CapacityExceeded`] for an oversized field,
/// [`GatewayError::Validation`] for a malformed address.
pub fn validate_submission(
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
    limits: SubmissionLimits,
) -> Result<(Address, Address), GatewayError> {
    if subject.len() > limits.max_subject_len {
        return Err(GatewayError::CapacityExceeded(Capacity::Field {
            field: "subject",
            limit: limits.max_subject_len,
        }));
    }

    if body.len() > limits.max_body_len {
        return Err(GatewayError::CapacityExceeded(Capacity::Field {
            field: "body",
            limit: limits.max_body_len,
        }));
    }

    Ok((Address::parse(from)?, Address::parse(to)?))
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub domain: String,
    #[serde(default)]
    pub selector: Option<String>,
}

/// Itemized verification of one domain.
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub domain: String,
    /// Name of the policy `trusted` was decided by
    pub policy: String,
    pub trusted: bool,
    pub checks: BTreeMap<Check, CheckStatus>,
}

impl VerifyResponse {
    #[must_use]
    pub fn new(report: &TrustReport, policy: &TrustPolicy) -> Self {
        Self {
            domain: report.domain().to_string(),
            policy: policy.name().to_string(),
            trusted: report.satisfies(policy),
            checks: report
                .checks()
                .map(|(check, status)| (check, status.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifySenderRequest {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifySenderResponse {
    pub email: String,
    pub sendable: bool,
    pub checks: BTreeMap<Check, CheckStatus>,
}
