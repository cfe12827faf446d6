//! Refresh-token rotation endpoint.

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::warn;

use super::error::{AuthError, INVALID_TOKEN_MESSAGE};
use super::rotation;
use super::state::AuthState;
use super::types::{RefreshRequest, SessionPairResponse};

/// Exchange a refresh token for a new session pair.
///
/// Rotation is all-or-nothing: on any failure the presented token is left
/// exactly as it was and no new tokens exist. Replay, staleness, and
/// unknown values are logged distinctly inside the coordinator but share
/// this endpoint's generic rejection.
#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Session rotated", body = SessionPairResponse),
        (status = 401, description = "Invalid or expired refresh token", body = String),
        (status = 503, description = "Store unavailable", body = String)
    ),
    tag = "auth"
)]
pub async fn refresh(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RefreshRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let token = request.refresh_token.trim();
    if token.is_empty() {
        return (StatusCode::UNAUTHORIZED, INVALID_TOKEN_MESSAGE.to_string()).into_response();
    }

    match rotation::rotate(&pool, &auth_state, token).await {
        Ok(pair) => (StatusCode::OK, Json(SessionPairResponse::from(pair))).into_response(),
        Err(AuthError::Unavailable) => (
            AuthError::Unavailable.status(),
            AuthError::Unavailable.public_message().to_string(),
        )
            .into_response(),
        Err(err) => {
            // The coordinator already logged the precise cause; the caller
            // only ever learns that the token no longer works.
            warn!("refresh rejected: {err}");
            (StatusCode::UNAUTHORIZED, INVALID_TOKEN_MESSAGE.to_string()).into_response()
        }
    }
}
