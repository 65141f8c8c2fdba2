//! API error types and their HTTP responses

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use blaze_common::{Capacity, GatewayError, TrustReport};
use serde::Serialize;
use thiserror::Error;

use crate::claims::TokenError;

/// Errors that can occur while starting or running the API server
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address
    #[error("Failed to bind API server to {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("Invalid API configuration: {0}")]
    Config(#[from] TokenError),

    /// API server encountered a runtime error
    #[error("API server error: {0}")]
    Runtime(String),
}

/// A failed request, rendered as `{"error": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The upstream relay failed. Its credential rejections are the
    /// gateway's problem, not the caller's.
    #[error(transparent)]
    Relay(GatewayError),

    /// Authenticated, but not allowed to act for this sender
    #[error("{0}")]
    Forbidden(String),

    /// The request body isn't the JSON the route expects
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::MissingSecret | TokenError::Encoding(_) => Self::Internal(err.to_string()),
            other => Self::Gateway(other.into()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a TrustReport>,
}

impl ApiError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Gateway(err) => gateway_status(err),
            Self::Relay(GatewayError::Authentication(_)) => StatusCode::BAD_GATEWAY,
            Self::Relay(err) => gateway_status(err),
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

const fn gateway_status(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
        GatewayError::Authentication(_) => StatusCode::UNAUTHORIZED,
        GatewayError::TrustVerification(_) => StatusCode::UNPROCESSABLE_ENTITY,
        GatewayError::CapacityExceeded(Capacity::RateLimit) => StatusCode::TOO_MANY_REQUESTS,
        GatewayError::CapacityExceeded(_) => StatusCode::PAYLOAD_TOO_LARGE,
        GatewayError::Network(_) | GatewayError::Protocol(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, %status, "Request rejected");
        }

        let report = match &self {
            Self::Gateway(err) | Self::Relay(err) => err.trust_report(),
            _ => None,
        };
        let body = ErrorBody {
            error: self.to_string(),
            report,
        };

        (status, Json(body)).into_response()
    }
}
