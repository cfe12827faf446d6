//! Session establishment and refresh-token rotation.
//!
//! Rotation is one logically atomic unit: verify the signed envelope,
//! redeem the old ledger row, and insert its successor inside a single
//! transaction. If redemption fails for any reason the transaction rolls
//! back and no new tokens exist anywhere. A half-rotated session (new
//! tokens minted while the old refresh value stays live) is the exact bug
//! class this module exists to prevent.

use sqlx::PgPool;
use tracing::{error, warn};

use super::credentials::{self, Principal};
use super::error::AuthError;
use super::ledger::{self, RedeemOutcome, TokenKind};
use super::state::AuthState;
use super::tokens::{self, SessionPair};
use super::utils::{generate_opaque_token, hash_token};

/// Mint a session pair for an authenticated principal and record the
/// refresh value in the ledger.
///
/// # Errors
/// Returns `Unavailable` when the store rejects the insert.
pub async fn establish_session(
    pool: &PgPool,
    state: &AuthState,
    principal: &Principal,
) -> Result<SessionPair, AuthError> {
    let refresh_value = generate_opaque_token().map_err(internal)?;

    ledger::issue(
        pool,
        principal.id,
        TokenKind::Refresh,
        &hash_token(&refresh_value),
        state.config().refresh_ttl_seconds(),
    )
    .await
    .map_err(internal)?;

    tokens::issue_session_pair(
        state.keys(),
        state.config(),
        principal.id,
        &principal.email,
        principal.domain,
        &refresh_value,
    )
    .map_err(internal)
}

/// Rotate a refresh token: retire the old ledger row and issue a new
/// session pair, atomically.
///
/// # Errors
/// - `InvalidToken` for signature/expiry/domain/binding failures.
/// - `AlreadyUsed` for a replay of a spent value (logged as such).
/// - `Expired` / `NotFound` for stale or unknown values.
/// - `Unauthorized` when the principal is gone or inactive.
/// - `Unavailable` for store failures.
///
/// Callers present every failure as the same generic rejection; the
/// distinct variants exist for security logging.
pub async fn rotate(
    pool: &PgPool,
    state: &AuthState,
    refresh_token: &str,
) -> Result<SessionPair, AuthError> {
    let claims = tokens::verify_refresh_signature(state.keys(), state.config(), refresh_token)?;

    let principal = credentials::find_by_id(pool, claims.principal_id)
        .await
        .map_err(internal)?;
    let Some(principal) = principal else {
        warn!(
            principal_id = %claims.principal_id,
            "refresh token for unknown principal"
        );
        return Err(AuthError::InvalidToken);
    };
    if !principal.active {
        warn!(principal_id = %principal.id, "refresh token for inactive principal");
        return Err(AuthError::Unauthorized);
    }
    // The signature binds principal id + email; a mismatch means the token
    // predates an address change (e.g. account closure) and dies here.
    if principal.domain != claims.domain || principal.email != claims.email {
        warn!(principal_id = %principal.id, "refresh token binding mismatch");
        return Err(AuthError::InvalidToken);
    }

    let mut tx = pool.begin().await.map_err(internal)?;

    let outcome = ledger::redeem_in_tx(&mut tx, TokenKind::Refresh, &hash_token(&claims.token_id))
        .await
        .map_err(internal)?;
    let old_record = match outcome {
        RedeemOutcome::Redeemed(record) => record,
        RedeemOutcome::AlreadyUsed => {
            let _ = tx.rollback().await;
            // Replay: someone presented a spent value. This is the signal
            // the ledger retains spent rows for.
            warn!(
                principal_id = %principal.id,
                "refresh token replay detected"
            );
            return Err(AuthError::AlreadyUsed);
        }
        RedeemOutcome::Expired => {
            let _ = tx.rollback().await;
            warn!(principal_id = %principal.id, "stale refresh token presented");
            return Err(AuthError::Expired);
        }
        RedeemOutcome::NotFound => {
            let _ = tx.rollback().await;
            warn!(principal_id = %principal.id, "unknown refresh token value");
            return Err(AuthError::NotFound);
        }
    };
    if old_record.principal_id != principal.id {
        let _ = tx.rollback().await;
        warn!(
            principal_id = %principal.id,
            "refresh token owned by a different principal"
        );
        return Err(AuthError::InvalidToken);
    }

    let new_value = generate_opaque_token().map_err(internal)?;
    ledger::issue_in_tx(
        &mut tx,
        principal.id,
        TokenKind::Refresh,
        &hash_token(&new_value),
        state.config().refresh_ttl_seconds(),
    )
    .await
    .map_err(internal)?;

    // Sign before committing so a signing failure leaves the old token
    // unredeemed instead of stranding the session.
    let pair = tokens::issue_session_pair(
        state.keys(),
        state.config(),
        principal.id,
        &principal.email,
        principal.domain,
        &new_value,
    )
    .map_err(internal)?;

    tx.commit().await.map_err(internal)?;

    Ok(pair)
}

/// Void every live refresh token for a principal (explicit logout).
///
/// # Errors
/// Returns `Unavailable` when the store rejects the update.
pub async fn revoke_all_sessions(pool: &PgPool, principal_id: uuid::Uuid) -> Result<u64, AuthError> {
    ledger::invalidate_all_of_kind(pool, principal_id, TokenKind::Refresh)
        .await
        .map_err(internal)
}

/// Log the cause and collapse it into the retryable store error.
fn internal<E: std::fmt::Display>(err: E) -> AuthError {
    error!("auth store failure: {err}");
    AuthError::Unavailable
}
