use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use blaze_common::{Address, Credentials, GatewayError, traits::relay::Outgoing};

use crate::{
    claims::{Claims, TokenError},
    error::ApiError,
    request::{
        LoginRequest, MessageResponse, SendRequest, TokenResponse, VerifiedSendRequest,
        VerifyRequest, VerifyResponse, VerifySenderRequest, VerifySenderResponse,
        validate_submission,
    },
    state::ApiState,
};

type Shared = State<Arc<ApiState>>;

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub async fn login(
    State(state): Shared,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(request) = payload?;

    let user = state.config.user(&request.email).ok_or_else(|| {
        tracing::info!(email = %request.email, "Login for unknown user");
        TokenError::UnknownUser
    })?;

    let stored = Credentials::new(user.email.as_str(), user.password.as_str());
    if !stored.matches(&user.email, &request.password) {
        tracing::info!(email = %user.email, "Login with wrong password");
        return Err(TokenError::WrongPassword.into());
    }

    let token = state.tokens.issue(&user.email, &user.domain)?;
    tracing::info!(email = %user.email, "Issued token");
    Ok(Json(TokenResponse { token }))
}

pub async fn refresh(
    State(state): Shared,
    Extension(claims): Extension<Claims>,
) -> Result<Json<TokenResponse>, ApiError> {
    let token = state.tokens.refresh(&claims)?;
    Ok(Json(TokenResponse { token }))
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn send(
    State(state): Shared,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(request) = payload?;
    let (from, to) = validate_submission(
        &request.from,
        &request.to,
        &request.subject,
        &request.body,
        state.limits(),
    )?;

    let message = Outgoing {
        from: &from,
        to: &to,
        subject: &request.subject,
        body: &request.body,
    };
    state
        .relay
        .send(&message, request.html, &state.destination)
        .await
        .map_err(ApiError::Relay)?;

    tracing::info!(user = %claims.email, %from, %to, "Relayed API submission");
    Ok(Json(MessageResponse {
        message: "Email sent successfully".to_string(),
    }))
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn send_verified(
    State(state): Shared,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<VerifiedSendRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(request) = payload?;

    if !claims.permits_sender(&request.from) {
        return Err(ApiError::Forbidden(format!(
            "{} may not send as {}",
            claims.email, request.from
        )));
    }

    let (from, to) = validate_submission(
        &request.from,
        &request.to,
        &request.subject,
        &request.body,
        state.limits(),
    )?;
    let reply_to = Address::parse(&request.reply_to)?;

    let message = Outgoing {
        from: &from,
        to: &to,
        subject: &request.subject,
        body: &request.body,
    };
    state
        .relay
        .send_with_verified_sender(&message, &reply_to.to_string())
        .await
        .map_err(ApiError::Relay)?;

    tracing::info!(user = %claims.email, %from, %to, "Relayed verified submission");
    Ok(Json(MessageResponse {
        message: "Email sent successfully".to_string(),
    }))
}

pub async fn verify_domain(
    State(state): Shared,
    Extension(_claims): Extension<Claims>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let Json(request) = payload?;

    let report = state
        .verifier
        .verify_with_selector(&request.domain, request.selector.as_deref())
        .await?;

    Ok(Json(VerifyResponse::new(&report, &state.domain_policy)))
}

pub async fn verify_sender(
    State(state): Shared,
    Extension(_claims): Extension<Claims>,
    payload: Result<Json<VerifySenderRequest>, JsonRejection>,
) -> Result<Json<VerifySenderResponse>, ApiError> {
    let Json(request) = payload?;

    let (sendable, report) = match state.gate.verify_email(&request.email).await {
        Ok(report) => (true, report),
        Err(GatewayError::TrustVerification(report)) => (false, *report),
        Err(err) => return Err(err.into()),
    };

    Ok(Json(VerifySenderResponse {
        email: request.email.trim().to_string(),
        sendable,
        checks: report
            .checks()
            .map(|(check, status)| (check, status.clone()))
            .collect(),
    }))
}
