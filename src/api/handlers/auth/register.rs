//! User registration endpoint.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::credentials::{self, CreateOutcome};
use super::error::AuthError;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::types::{Domain, RegisterRequest, RegisterResponse};
use super::utils::{extract_client_ip, normalize_email, valid_email, valid_password};
use super::verification::issue_email_verification;

/// Register a new user and queue a verification email.
///
/// The principal row, verification token, and outbox row are written in
/// one transaction; a conflict on the address rolls all of it back.
#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = RegisterResponse),
        (status = 400, description = "Invalid email or password", body = String),
        (status = 409, description = "Address already registered", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }
    if !valid_password(&request.password) {
        return (StatusCode::BAD_REQUEST, "Invalid password".to_string()).into_response();
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Register)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start register transaction: {err}");
            return unavailable();
        }
    };

    let outcome = match credentials::create_in_tx(&mut tx, Domain::User, &email, &request.password)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("Failed to create principal: {err}");
            let _ = tx.rollback().await;
            return unavailable();
        }
    };

    let principal = match outcome {
        CreateOutcome::Created(principal) => principal,
        CreateOutcome::Conflict => {
            let _ = tx.rollback().await;
            return (
                AuthError::Conflict.status(),
                AuthError::Conflict.public_message().to_string(),
            )
                .into_response();
        }
    };

    if let Err(err) =
        issue_email_verification(&mut tx, auth_state.config(), principal.id, &principal.email)
            .await
    {
        error!("Failed to issue verification token: {err}");
        let _ = tx.rollback().await;
        return unavailable();
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit register transaction: {err}");
        return unavailable();
    }

    (
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "Registered; verification email queued".to_string(),
        }),
    )
        .into_response()
}

fn unavailable() -> axum::response::Response {
    (
        AuthError::Unavailable.status(),
        AuthError::Unavailable.public_message().to_string(),
    )
        .into_response()
}
