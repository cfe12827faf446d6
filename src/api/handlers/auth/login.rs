//! Login endpoints for both principal domains.
//!
//! The two routes share one flow; the domain is fixed by the route, never
//! taken from the request body.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, warn};

use super::credentials;
use super::error::AuthError;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::rotation::establish_session;
use super::state::AuthState;
use super::types::{Domain, LoginRequest, SessionPairResponse};
use super::utils::{extract_client_ip, normalize_email, valid_email};

/// User login.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session established", body = SessionPairResponse),
        (status = 401, description = "Invalid credentials", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    authenticate(Domain::User, &headers, &pool, &auth_state, payload).await
}

/// Admin login. Same mechanism, separate trust tier and token domain.
#[utoipa::path(
    post,
    path = "/v1/auth/admin/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Admin session established", body = SessionPairResponse),
        (status = 401, description = "Invalid credentials", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn admin_login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    authenticate(Domain::Admin, &headers, &pool, &auth_state, payload).await
}

async fn authenticate(
    domain: Domain,
    headers: &HeaderMap,
    pool: &PgPool,
    auth_state: &AuthState,
    payload: Option<Json<LoginRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return unauthorized();
    }

    let client_ip = extract_client_ip(headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Login)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_address(&email, RateLimitAction::Login)
            == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    // Lookup is domain-scoped: an admin row never answers a user login.
    let principal = match credentials::find_by_address(pool, domain, &email).await {
        Ok(principal) => principal,
        Err(err) => {
            error!("Failed to lookup principal for login: {err}");
            return (
                AuthError::Unavailable.status(),
                AuthError::Unavailable.public_message().to_string(),
            )
                .into_response();
        }
    };

    let Some(principal) = principal else {
        return unauthorized();
    };
    if !principal.active || !credentials::verify_secret(&principal, &request.password) {
        warn!(
            principal_id = %principal.id,
            domain = domain.as_str(),
            "failed login attempt"
        );
        return unauthorized();
    }

    match establish_session(pool, auth_state, &principal).await {
        Ok(pair) => (StatusCode::OK, Json(SessionPairResponse::from(pair))).into_response(),
        Err(err) => {
            error!("Failed to establish session: {err}");
            (err.status(), err.public_message().to_string()).into_response()
        }
    }
}

fn unauthorized() -> Response {
    (
        AuthError::Unauthorized.status(),
        AuthError::Unauthorized.public_message().to_string(),
    )
        .into_response()
}
