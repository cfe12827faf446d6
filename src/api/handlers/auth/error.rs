//! Error taxonomy for the credential and token core.

use axum::http::StatusCode;
use thiserror::Error;

/// Failures surfaced by the auth core.
///
/// `NotFound`, `Expired`, and `AlreadyUsed` stay distinct internally so
/// redemption flows can log replay attempts separately from stale tokens;
/// the response body for all three is the same generic string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("no matching principal or token")]
    NotFound,
    #[error("address already registered in this domain")]
    Conflict,
    #[error("bad secret or inactive principal")]
    Unauthorized,
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    Expired,
    #[error("token already redeemed")]
    AlreadyUsed,
    #[error("store unavailable")]
    Unavailable,
}

/// Generic message for every failed redemption; precise cause goes to logs only.
pub const INVALID_TOKEN_MESSAGE: &str = "Invalid or expired token";

impl AuthError {
    /// HTTP status for this failure.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound | Self::Expired | Self::AlreadyUsed | Self::InvalidToken => {
                StatusCode::BAD_REQUEST
            }
            Self::Conflict => StatusCode::CONFLICT,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Response body that never leaks which check failed.
    #[must_use]
    pub const fn public_message(&self) -> &'static str {
        match self {
            Self::NotFound | Self::Expired | Self::AlreadyUsed | Self::InvalidToken => {
                INVALID_TOKEN_MESSAGE
            }
            Self::Conflict => "Address already registered",
            Self::Unauthorized => "Invalid credentials",
            Self::Unavailable => "Service unavailable, retry later",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redemption_failures_share_one_public_face() {
        // Replay, stale, and unknown tokens must be indistinguishable to callers.
        for err in [
            AuthError::NotFound,
            AuthError::Expired,
            AuthError::AlreadyUsed,
            AuthError::InvalidToken,
        ] {
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
            assert_eq!(err.public_message(), INVALID_TOKEN_MESSAGE);
        }
    }

    #[test]
    fn distinct_statuses_for_non_redemption_errors() {
        assert_eq!(AuthError::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(AuthError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::Unavailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn internal_detail_stays_internal() {
        // Display strings are for logs; they must differ even when the
        // public message is shared.
        assert_ne!(
            AuthError::AlreadyUsed.to_string(),
            AuthError::Expired.to_string()
        );
    }
}
