//! Session introspection, logout, and the access-token guard used by
//! protected routes.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info};

use super::error::AuthError;
use super::rotation::revoke_all_sessions;
use super::state::AuthState;
use super::tokens::{self, SessionClaims};
use super::types::{Domain, SessionResponse};

/// Verify the bearer access token for an expected domain.
///
/// This is the guard every protected route goes through; the expected
/// domain is always named by the caller. Verification is stateless:
/// signature and claims only, no store access.
///
/// # Errors
/// Returns `401 Unauthorized` when the header is missing or the token does
/// not verify for `expected_domain`.
pub fn require_session(
    headers: &HeaderMap,
    auth_state: &AuthState,
    expected_domain: Domain,
) -> Result<SessionClaims, StatusCode> {
    let token = extract_bearer_token(headers).ok_or(StatusCode::UNAUTHORIZED)?;
    tokens::verify_session(
        auth_state.keys(),
        auth_state.config(),
        &token,
        expected_domain,
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)
}

/// Resolve claims for either domain, each checked explicitly.
fn any_domain_claims(headers: &HeaderMap, auth_state: &AuthState) -> Option<SessionClaims> {
    require_session(headers, auth_state, Domain::User)
        .or_else(|_| require_session(headers, auth_state, Domain::Admin))
        .ok()
}

/// Echo the claims of a valid access token.
#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    // Missing or invalid tokens are indistinguishable here to avoid
    // leaking auth state.
    match any_domain_claims(&headers, &auth_state) {
        Some(claims) => (
            StatusCode::OK,
            Json(SessionResponse {
                principal_id: claims.principal_id.to_string(),
                email: claims.email,
                domain: claims.domain,
            }),
        )
            .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Explicit logout: void every live refresh token for the principal.
///
/// The access token itself stays valid until its natural expiry (it is
/// stateless by design); what logout guarantees is that the session can
/// no longer be extended.
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Refresh tokens revoked"),
        (status = 401, description = "Missing or invalid access token"),
        (status = 503, description = "Store unavailable", body = String)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let Some(claims) = any_domain_claims(&headers, &auth_state) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match revoke_all_sessions(&pool, claims.principal_id).await {
        Ok(revoked) => {
            info!(
                principal_id = %claims.principal_id,
                revoked,
                "logout revoked refresh tokens"
            );
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            error!("Failed to revoke sessions: {err}");
            (
                AuthError::Unavailable.status(),
                AuthError::Unavailable.public_message().to_string(),
            )
                .into_response()
        }
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
