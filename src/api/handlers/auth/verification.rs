//! Email verification endpoints.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use super::credentials;
use super::email_templates;
use super::error::{AuthError, INVALID_TOKEN_MESSAGE};
use super::ledger::{self, RedeemOutcome, TokenKind};
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::{AuthConfig, AuthState};
use super::types::{Domain, EmailVerificationRequest, VerifyEmailRequest};
use super::utils::{
    build_verify_url, extract_client_ip, generate_opaque_token, hash_token, normalize_email,
    valid_email,
};
use crate::api::email;

/// Issue a verification token and queue the email inside the caller's
/// transaction. Used by registration and by resend requests.
pub(super) async fn issue_email_verification(
    tx: &mut Transaction<'_, Postgres>,
    config: &AuthConfig,
    principal_id: Uuid,
    email: &str,
) -> anyhow::Result<String> {
    let token = generate_opaque_token()?;
    ledger::issue_in_tx(
        tx,
        principal_id,
        TokenKind::EmailVerification,
        &hash_token(&token),
        config.verify_token_ttl_seconds(),
    )
    .await?;

    let verify_url = build_verify_url(config.frontend_base_url(), &token);
    email::enqueue_in_tx(
        tx,
        email,
        email_templates::VERIFY_EMAIL,
        &json!({
            "email": email,
            "verify_url": verify_url,
        }),
    )
    .await?;

    Ok(token)
}

/// Request (re)delivery of a verification email.
///
/// Always 202: the response never reveals whether the address exists or
/// is already verified. Tokens are only issued for active, unverified
/// users.
#[utoipa::path(
    post,
    path = "/v1/auth/verify-email/request",
    request_body = EmailVerificationRequest,
    responses(
        (status = 202, description = "Accepted; a verification email is queued if applicable"),
        (status = 400, description = "Malformed request", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn request_email_verification(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<EmailVerificationRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::VerifyEmail)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_address(&email, RateLimitAction::VerifyEmail)
            == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    match issue_for_address(&pool, auth_state.config(), &email).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => {
            error!("Failed to issue verification token: {err}");
            (
                AuthError::Unavailable.status(),
                AuthError::Unavailable.public_message().to_string(),
            )
                .into_response()
        }
    }
}

async fn issue_for_address(pool: &PgPool, config: &AuthConfig, email: &str) -> anyhow::Result<()> {
    let principal = credentials::find_by_address(pool, Domain::User, email).await?;
    let Some(principal) = principal else {
        return Ok(());
    };
    if !principal.active || principal.email_verified_at.is_some() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    issue_email_verification(&mut tx, config, principal.id, &principal.email).await?;
    tx.commit().await?;
    Ok(())
}

/// Verify the email link by redeeming the token and flagging the user.
#[utoipa::path(
    post,
    path = "/v1/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 204, description = "Email verified"),
        (status = 400, description = "Invalid or expired token", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let token = request.token.trim();
    if token.is_empty() {
        return (StatusCode::BAD_REQUEST, INVALID_TOKEN_MESSAGE.to_string()).into_response();
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::VerifyEmail)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start verify-email transaction: {err}");
            return unavailable();
        }
    };

    let token_hash = hash_token(token);

    if let Ok(Some(address)) =
        ledger::lookup_owner_address(&mut tx, TokenKind::EmailVerification, &token_hash).await
        && auth_state
            .rate_limiter()
            .check_address(&address, RateLimitAction::VerifyEmail)
            == RateLimitDecision::Limited
    {
        let _ = tx.rollback().await;
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    let outcome =
        match ledger::redeem_in_tx(&mut tx, TokenKind::EmailVerification, &token_hash).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("Failed to redeem verification token: {err}");
                let _ = tx.rollback().await;
                return unavailable();
            }
        };

    let record = match outcome {
        RedeemOutcome::Redeemed(record) => record,
        RedeemOutcome::AlreadyUsed => {
            let _ = tx.rollback().await;
            warn!("verification token replay attempt");
            return invalid_token();
        }
        RedeemOutcome::Expired | RedeemOutcome::NotFound => {
            let _ = tx.rollback().await;
            return invalid_token();
        }
    };

    if let Err(err) = credentials::mark_email_verified_in_tx(&mut tx, record.principal_id).await {
        error!("Failed to mark email verified: {err}");
        let _ = tx.rollback().await;
        return unavailable();
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit verify-email transaction: {err}");
        return unavailable();
    }

    StatusCode::NO_CONTENT.into_response()
}

fn invalid_token() -> Response {
    (StatusCode::BAD_REQUEST, INVALID_TOKEN_MESSAGE.to_string()).into_response()
}

fn unavailable() -> Response {
    (
        AuthError::Unavailable.status(),
        AuthError::Unavailable.public_message().to_string(),
    )
        .into_response()
}
