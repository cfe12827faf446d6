//! One-time passcode endpoints.
//!
//! OTP codes live in the 6-digit numeric space, which is only defensible
//! because the TTL is short, redemption is owner-scoped, and the rate
//! limiter is consulted before any ledger work. A wrong code never touches
//! the stored record; the right code stays redeemable within the window.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, warn};

use super::credentials;
use super::email_templates;
use super::error::{AuthError, INVALID_TOKEN_MESSAGE};
use super::ledger::{self, RedeemOutcome, TokenKind};
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::{AuthConfig, AuthState};
use super::types::{Domain, OtpRedeemRequest, OtpRequest};
use super::utils::{extract_client_ip, generate_otp_code, hash_token, normalize_email, valid_email};
use crate::api::email;

/// Request a one-time passcode.
///
/// Always 202; codes are only issued for active users and the response
/// shape never reveals whether the address exists.
#[utoipa::path(
    post,
    path = "/v1/auth/otp/request",
    request_body = OtpRequest,
    responses(
        (status = 202, description = "Accepted; a passcode email is queued if the address is known"),
        (status = 400, description = "Malformed request", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn request_otp(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<OtpRequest>>,
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
        .check_ip(client_ip.as_deref(), RateLimitAction::Otp)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_address(&email, RateLimitAction::Otp)
            == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    match issue_for_address(&pool, auth_state.config(), &email).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => {
            error!("Failed to issue OTP: {err}");
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
    if !principal.active {
        return Ok(());
    }

    let code = generate_otp_code();
    let mut tx = pool.begin().await?;
    ledger::issue_in_tx(
        &mut tx,
        principal.id,
        TokenKind::Otp,
        &hash_token(&code),
        config.otp_ttl_seconds(),
    )
    .await?;
    email::enqueue_in_tx(
        &mut tx,
        &principal.email,
        email_templates::OTP_CODE,
        &json!({
            "email": principal.email,
            "code": code,
        }),
    )
    .await?;
    tx.commit().await?;
    Ok(())
}

/// Redeem a one-time passcode for an address.
#[utoipa::path(
    post,
    path = "/v1/auth/otp/redeem",
    request_body = OtpRedeemRequest,
    responses(
        (status = 204, description = "Passcode accepted"),
        (status = 400, description = "Invalid or expired token", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn redeem_otp(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<OtpRedeemRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let email = normalize_email(&request.email);
    let code = request.code.trim();
    if !valid_email(&email) || code.is_empty() {
        return invalid_token();
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Otp)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_address(&email, RateLimitAction::Otp)
            == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    let principal = match credentials::find_by_address(&pool, Domain::User, &email).await {
        Ok(principal) => principal,
        Err(err) => {
            error!("Failed to lookup principal for OTP: {err}");
            return unavailable();
        }
    };
    let Some(principal) = principal else {
        // Unknown address gets the same rejection as a wrong code.
        return invalid_token();
    };
    if !principal.active {
        return invalid_token();
    }

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start OTP transaction: {err}");
            return unavailable();
        }
    };

    let outcome = match ledger::redeem_for_owner_in_tx(
        &mut tx,
        principal.id,
        TokenKind::Otp,
        &hash_token(code),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("Failed to redeem OTP: {err}");
            let _ = tx.rollback().await;
            return unavailable();
        }
    };

    match outcome {
        RedeemOutcome::Redeemed(_) => {
            if let Err(err) = tx.commit().await {
                error!("Failed to commit OTP transaction: {err}");
                return unavailable();
            }
            StatusCode::NO_CONTENT.into_response()
        }
        RedeemOutcome::AlreadyUsed => {
            let _ = tx.rollback().await;
            warn!(principal_id = %principal.id, "OTP replay attempt");
            invalid_token()
        }
        RedeemOutcome::Expired | RedeemOutcome::NotFound => {
            // A wrong code lands here as NotFound and leaves any live code
            // untouched and redeemable.
            let _ = tx.rollback().await;
            invalid_token()
        }
    }
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
