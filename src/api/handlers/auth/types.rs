//! Principal domains and request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Principal domains. Users and administrators are disjoint: an address can
/// exist in both, and credentials minted for one never authenticate the
/// other. Every verification site names the domain it expects.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    User,
    Admin,
}

impl Domain {
    /// Tag stored in the `principals.domain` column.
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    /// Audience claim embedded in signed session tokens.
    pub(crate) const fn audience(self) -> &'static str {
        match self {
            Self::User => "wayfarer:user",
            Self::Admin => "wayfarer:admin",
        }
    }

    pub(crate) fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "user" => Some(Self::User),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub(crate) fn from_audience(audience: &str) -> Option<Self> {
        match audience {
            "wayfarer:user" => Some(Self::User),
            "wayfarer:admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterResponse {
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub access_expires_at: String,
}

impl From<super::tokens::SessionPair> for SessionPairResponse {
    fn from(pair: super::tokens::SessionPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "Bearer".to_string(),
            access_expires_at: pair.access_expires_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub principal_id: String,
    pub email: String,
    pub domain: Domain,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasswordResetRedeemRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct EmailVerificationRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OtpRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OtpRedeemRequest {
    pub email: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn domain_tags_round_trip() {
        for domain in [Domain::User, Domain::Admin] {
            assert_eq!(Domain::from_tag(domain.as_str()), Some(domain));
            assert_eq!(Domain::from_audience(domain.audience()), Some(domain));
        }
        assert_eq!(Domain::from_tag("operator"), None);
        assert_eq!(Domain::from_audience("wayfarer:operator"), None);
    }

    #[test]
    fn domain_serializes_snake_case() -> Result<()> {
        let value = serde_json::to_value(Domain::Admin)?;
        assert_eq!(value, serde_json::json!("admin"));
        Ok(())
    }

    #[test]
    fn login_request_round_trips() -> Result<()> {
        let request = LoginRequest {
            email: "alice@example.com".to_string(),
            password: "hunter2hunter2".to_string(),
        };
        let value = serde_json::to_value(&request)?;
        let email = value
            .get("email")
            .and_then(serde_json::Value::as_str)
            .context("missing email")?;
        assert_eq!(email, "alice@example.com");
        let decoded: LoginRequest = serde_json::from_value(value)?;
        assert_eq!(decoded.password, "hunter2hunter2");
        Ok(())
    }

    #[test]
    fn otp_redeem_request_round_trips() -> Result<()> {
        let request = OtpRedeemRequest {
            email: "bob@example.com".to_string(),
            code: "004711".to_string(),
        };
        let value = serde_json::to_value(&request)?;
        let decoded: OtpRedeemRequest = serde_json::from_value(value)?;
        assert_eq!(decoded.code, "004711");
        Ok(())
    }
}
