//! Password reset: issue-then-single-use-redeem through the ledger.

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
use super::types::{Domain, PasswordResetRedeemRequest, PasswordResetRequest};
use super::utils::{
    build_reset_url, extract_client_ip, generate_opaque_token, hash_token, normalize_email,
    valid_email, valid_password,
};
use crate::api::email;

/// Request a password reset link.
///
/// The response is the same 202 whether or not the address exists, is
/// active, or belongs to an admin; the endpoint is not an address oracle.
/// Tokens are only issued for active users; for everyone else the request
/// is quietly a no-op.
#[utoipa::path(
    post,
    path = "/v1/auth/password-reset/request",
    request_body = PasswordResetRequest,
    responses(
        (status = 202, description = "Accepted; a reset email is queued if the address is known"),
        (status = 400, description = "Malformed request", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn request_password_reset(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<PasswordResetRequest>>,
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
        .check_ip(client_ip.as_deref(), RateLimitAction::PasswordReset)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_address(&email, RateLimitAction::PasswordReset)
            == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    match issue_for_address(&pool, auth_state.config(), &email).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => {
            error!("Failed to issue password reset: {err}");
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
        // Unknown address: same ack, no token, no outbox row.
        return Ok(());
    };
    if !principal.active {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    issue_password_reset(&mut tx, config, principal.id, &principal.email).await?;
    tx.commit().await?;
    Ok(())
}

/// Issue a reset token and queue the email inside the caller's transaction.
pub(super) async fn issue_password_reset(
    tx: &mut Transaction<'_, Postgres>,
    config: &AuthConfig,
    principal_id: Uuid,
    email: &str,
) -> anyhow::Result<String> {
    let token = generate_opaque_token()?;
    ledger::issue_in_tx(
        tx,
        principal_id,
        TokenKind::PasswordReset,
        &hash_token(&token),
        config.reset_token_ttl_seconds(),
    )
    .await?;

    let reset_url = build_reset_url(config.frontend_base_url(), &token);
    email::enqueue_in_tx(
        tx,
        email,
        email_templates::PASSWORD_RESET,
        &json!({
            "email": email,
            "reset_url": reset_url,
        }),
    )
    .await?;

    Ok(token)
}

/// Redeem a reset token and store the new secret.
///
/// Redemption and the secret update share one transaction; outstanding
/// refresh tokens are deliberately left alone.
#[utoipa::path(
    post,
    path = "/v1/auth/password-reset/redeem",
    request_body = PasswordResetRedeemRequest,
    responses(
        (status = 204, description = "Secret updated"),
        (status = 400, description = "Invalid or expired token", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn redeem_password_reset(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<PasswordResetRedeemRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let token = request.token.trim();
    if token.is_empty() {
        return (StatusCode::BAD_REQUEST, INVALID_TOKEN_MESSAGE.to_string()).into_response();
    }
    if !valid_password(&request.new_password) {
        return (StatusCode::BAD_REQUEST, "Invalid password".to_string()).into_response();
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::PasswordReset)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start reset transaction: {err}");
            return unavailable();
        }
    };

    let token_hash = hash_token(token);

    // Per-address throttling before any redemption work.
    if let Ok(Some(address)) =
        ledger::lookup_owner_address(&mut tx, TokenKind::PasswordReset, &token_hash).await
        && auth_state
            .rate_limiter()
            .check_address(&address, RateLimitAction::PasswordReset)
            == RateLimitDecision::Limited
    {
        let _ = tx.rollback().await;
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    let outcome = match ledger::redeem_in_tx(&mut tx, TokenKind::PasswordReset, &token_hash).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("Failed to redeem reset token: {err}");
            let _ = tx.rollback().await;
            return unavailable();
        }
    };

    let record = match outcome {
        RedeemOutcome::Redeemed(record) => record,
        RedeemOutcome::AlreadyUsed => {
            let _ = tx.rollback().await;
            warn!("password reset replay attempt");
            return invalid_token();
        }
        RedeemOutcome::Expired | RedeemOutcome::NotFound => {
            let _ = tx.rollback().await;
            return invalid_token();
        }
    };

    if let Err(err) =
        credentials::update_secret_in_tx(&mut tx, record.principal_id, &request.new_password).await
    {
        error!("Failed to update secret: {err}");
        let _ = tx.rollback().await;
        return unavailable();
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit reset transaction: {err}");
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
