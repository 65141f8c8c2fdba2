//! Request gates: per-client rate limiting and claims.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use blaze_common::{Capacity, GatewayError};

use crate::{error::ApiError, state::ApiState};

/// Refuse the request with 429 once the client's bucket is empty.
///
/// Clients are keyed by peer IP. Without connection info every request
/// shares one bucket.
pub async fn rate_limit(State(state): State<Arc<ApiState>>, request: Request, next: Next) -> Response {
    let key = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |ConnectInfo(addr)| addr.ip().to_string());

    if !state.limiter.allow(&key) {
        tracing::info!(client = %key, path = %request.uri().path(), "Rate limit exceeded");
        return ApiError::from(GatewayError::CapacityExceeded(Capacity::RateLimit)).into_response();
    }

    next.run(request).await
}

/// The token from `Authorization: Bearer <token>`, or a bare token.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => token.trim(),
        _ if value.eq_ignore_ascii_case("bearer") => "",
        _ => value,
    };

    (!token.is_empty()).then_some(token)
}

/// Validate the caller's claims and make them available to the handler as
/// an `Extension<Claims>`.
pub async fn require_claims(
    State(state): State<Arc<ApiState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        return ApiError::from(GatewayError::Authentication(
            "missing authorization token".to_string(),
        ))
        .into_response();
    };

    match state.tokens.validate(token) {
        Ok(claims) => {
            tracing::debug!(email = %claims.email, "Claims accepted");
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(err) => {
            tracing::info!(%err, "Rejected token");
            ApiError::from(err).into_response()
        }
    }
}
