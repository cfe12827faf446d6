//! PASETO v4.public session token minting and verification.
//!
//! Flow Overview:
//! 1) Build domain-tagged claims with RFC3339 timestamps.
//! 2) Sign with the shared Ed25519 session key.
//! 3) Verify signature, expiry, issuer, domain, and token use: any
//!    mismatch is reported as an invalid token, with no partial trust.
//!
//! Access tokens are stateless: verification never touches the ledger.
//! Refresh tokens carry the opaque ledger value as `jti`; the signature
//! binds principal id and email independently of that value. Single-use
//! accounting stays with the rotation coordinator so the two concerns are
//! independently testable.

use anyhow::{Context, Result, anyhow};
use ed25519_dalek::SigningKey;
use pasetors::claims::{Claims, ClaimsValidationRules};
use pasetors::keys::{AsymmetricPublicKey, AsymmetricSecretKey};
use pasetors::token::UntrustedToken;
use pasetors::{Public, public, version4::V4};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use ulid::Ulid;
use uuid::Uuid;

use super::error::AuthError;
use super::state::AuthConfig;
use super::types::Domain;

const CLAIM_EMAIL: &str = "email";
const CLAIM_USE: &str = "use";
const USE_ACCESS: &str = "access";
const USE_REFRESH: &str = "refresh";

/// Ed25519 pair used to sign and verify session tokens.
///
/// All replicas must share the seed; rotating it invalidates every
/// outstanding access and refresh token.
pub struct SessionKeys {
    secret: AsymmetricSecretKey<V4>,
    public: AsymmetricPublicKey<V4>,
}

impl SessionKeys {
    /// Derive the signing pair from a 32-byte seed.
    ///
    /// # Errors
    /// Returns an error if the derived key material is rejected.
    pub fn from_seed(seed: [u8; 32]) -> Result<Self> {
        let signing = SigningKey::from_bytes(&seed);
        let secret = AsymmetricSecretKey::<V4>::from(&signing.to_keypair_bytes())
            .map_err(|err| anyhow!("invalid session signing key: {err}"))?;
        let public = AsymmetricPublicKey::<V4>::from(signing.verifying_key().as_bytes())
            .map_err(|err| anyhow!("invalid session verifying key: {err}"))?;
        Ok(Self { secret, public })
    }
}

/// Claims extracted from a verified session token.
#[derive(Debug, Clone)]
pub struct SessionClaims {
    pub principal_id: Uuid,
    pub email: String,
    pub domain: Domain,
    pub token_id: String,
    pub expires_at: String,
}

/// Freshly minted access + refresh tokens.
#[derive(Debug, Clone)]
pub struct SessionPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: String,
}

/// Mint an access + refresh pair for a principal.
///
/// `refresh_value` is the opaque ledger value backing the refresh token;
/// it must already be persisted (or be persisted in the same transaction).
///
/// # Errors
/// Returns an error if timestamp formatting or signing fails.
pub fn issue_session_pair(
    keys: &SessionKeys,
    config: &AuthConfig,
    principal_id: Uuid,
    email: &str,
    domain: Domain,
    refresh_value: &str,
) -> Result<SessionPair> {
    let access_expires_at = expiry_rfc3339(config.access_ttl_seconds(domain))?;
    let access_token = sign_token(
        keys,
        config,
        principal_id,
        email,
        domain,
        USE_ACCESS,
        &Ulid::new().to_string(),
        &access_expires_at,
    )?;

    let refresh_expires_at = expiry_rfc3339(config.refresh_ttl_seconds())?;
    let refresh_token = sign_token(
        keys,
        config,
        principal_id,
        email,
        domain,
        USE_REFRESH,
        refresh_value,
        &refresh_expires_at,
    )?;

    Ok(SessionPair {
        access_token,
        refresh_token,
        access_expires_at,
    })
}

/// Verify an access token for the expected domain.
///
/// # Errors
/// Returns `InvalidToken` on any signature, expiry, issuer, domain, or
/// token-use mismatch.
pub fn verify_session(
    keys: &SessionKeys,
    config: &AuthConfig,
    token: &str,
    expected_domain: Domain,
) -> Result<SessionClaims, AuthError> {
    verify_signed(keys, config, token, Some(expected_domain), USE_ACCESS)
}

/// Verify a refresh token's signature and expiry only.
///
/// The ledger is deliberately not consulted here; whether the value is
/// still unspent is the rotation coordinator's decision.
///
/// # Errors
/// Returns `InvalidToken` on any cryptographic or temporal mismatch.
pub fn verify_refresh_signature(
    keys: &SessionKeys,
    config: &AuthConfig,
    token: &str,
) -> Result<SessionClaims, AuthError> {
    verify_signed(keys, config, token, None, USE_REFRESH)
}

#[allow(clippy::too_many_arguments)]
fn sign_token(
    keys: &SessionKeys,
    config: &AuthConfig,
    principal_id: Uuid,
    email: &str,
    domain: Domain,
    token_use: &str,
    token_id: &str,
    expires_at: &str,
) -> Result<String> {
    let mut claims = Claims::new().map_err(|err| anyhow!("build claims: {err}"))?;
    claims
        .issuer(config.issuer())
        .map_err(|err| anyhow!("set issuer: {err}"))?;
    claims
        .subject(&principal_id.to_string())
        .map_err(|err| anyhow!("set subject: {err}"))?;
    claims
        .audience(domain.audience())
        .map_err(|err| anyhow!("set audience: {err}"))?;
    claims
        .token_identifier(token_id)
        .map_err(|err| anyhow!("set jti: {err}"))?;
    claims
        .expiration(expires_at)
        .map_err(|err| anyhow!("set expiration: {err}"))?;
    claims
        .add_additional(CLAIM_EMAIL, email)
        .map_err(|err| anyhow!("set email claim: {err}"))?;
    claims
        .add_additional(CLAIM_USE, token_use)
        .map_err(|err| anyhow!("set use claim: {err}"))?;

    public::sign(&keys.secret, &claims, None, None).map_err(|err| anyhow!("sign token: {err}"))
}

fn verify_signed(
    keys: &SessionKeys,
    config: &AuthConfig,
    token: &str,
    expected_domain: Option<Domain>,
    expected_use: &str,
) -> Result<SessionClaims, AuthError> {
    let untrusted =
        UntrustedToken::<Public, V4>::try_from(token).map_err(|_| AuthError::InvalidToken)?;

    // Expiry and not-before are validated by the rules; issuer and (for
    // access tokens) audience are pinned here as well.
    let mut rules = ClaimsValidationRules::new();
    rules.validate_issuer_with(config.issuer());
    if let Some(domain) = expected_domain {
        rules.validate_audience_with(domain.audience());
    }

    let trusted = public::verify(&keys.public, &untrusted, &rules, None, None)
        .map_err(|_| AuthError::InvalidToken)?;
    let payload = trusted.payload_claims().ok_or(AuthError::InvalidToken)?;

    let subject = claim_str(payload, "sub")?;
    let principal_id = Uuid::parse_str(&subject).map_err(|_| AuthError::InvalidToken)?;

    let audience = claim_str(payload, "aud")?;
    let domain = Domain::from_audience(&audience).ok_or(AuthError::InvalidToken)?;
    if let Some(expected) = expected_domain {
        // Domain isolation is checked explicitly at the call site, never
        // inferred from payload shape.
        if domain != expected {
            return Err(AuthError::InvalidToken);
        }
    }

    let token_use = claim_str(payload, CLAIM_USE)?;
    if token_use != expected_use {
        return Err(AuthError::InvalidToken);
    }

    Ok(SessionClaims {
        principal_id,
        email: claim_str(payload, CLAIM_EMAIL)?,
        domain,
        token_id: claim_str(payload, "jti")?,
        expires_at: claim_str(payload, "exp")?,
    })
}

fn claim_str(claims: &Claims, name: &str) -> Result<String, AuthError> {
    claims
        .get_claim(name)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or(AuthError::InvalidToken)
}

fn expiry_rfc3339(ttl_seconds: i64) -> Result<String> {
    if ttl_seconds <= 0 {
        return Err(anyhow!("token ttl must be positive"));
    }
    let exp = OffsetDateTime::now_utc() + time::Duration::seconds(ttl_seconds);
    // Strip nanoseconds for cleaner payloads and better JS compatibility.
    exp.replace_nanosecond(0)
        .context("strip exp nanoseconds")?
        .format(&Rfc3339)
        .context("format exp")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AuthConfig {
        AuthConfig::new("https://wayfarer.dev".to_string())
    }

    fn test_keys() -> SessionKeys {
        SessionKeys::from_seed([7u8; 32]).expect("session keys")
    }

    fn test_pair(domain: Domain) -> (SessionPair, Uuid) {
        let principal_id = Uuid::new_v4();
        let pair = issue_session_pair(
            &test_keys(),
            &test_config(),
            principal_id,
            "alice@example.com",
            domain,
            "refresh-value",
        )
        .expect("session pair");
        (pair, principal_id)
    }

    #[test]
    fn issue_and_verify_round_trip() {
        let (pair, principal_id) = test_pair(Domain::User);
        assert!(pair.access_token.starts_with("v4.public."));
        assert!(pair.refresh_token.starts_with("v4.public."));

        let claims = verify_session(
            &test_keys(),
            &test_config(),
            &pair.access_token,
            Domain::User,
        )
        .expect("valid access token");
        assert_eq!(claims.principal_id, principal_id);
        assert_eq!(claims.email, "alice@example.com");
        assert_eq!(claims.domain, Domain::User);
        assert_eq!(claims.expires_at, pair.access_expires_at);
    }

    #[test]
    fn access_token_rejected_across_domains() {
        let (user_pair, _) = test_pair(Domain::User);
        let (admin_pair, _) = test_pair(Domain::Admin);

        let result = verify_session(
            &test_keys(),
            &test_config(),
            &user_pair.access_token,
            Domain::Admin,
        );
        assert_eq!(result.err(), Some(AuthError::InvalidToken));

        let result = verify_session(
            &test_keys(),
            &test_config(),
            &admin_pair.access_token,
            Domain::User,
        );
        assert_eq!(result.err(), Some(AuthError::InvalidToken));
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let (pair, _) = test_pair(Domain::User);
        let result = verify_session(
            &test_keys(),
            &test_config(),
            &pair.refresh_token,
            Domain::User,
        );
        assert_eq!(result.err(), Some(AuthError::InvalidToken));
    }

    #[test]
    fn access_token_is_not_a_refresh_token() {
        let (pair, _) = test_pair(Domain::User);
        let result = verify_refresh_signature(&test_keys(), &test_config(), &pair.access_token);
        assert_eq!(result.err(), Some(AuthError::InvalidToken));
    }

    #[test]
    fn refresh_signature_carries_ledger_value() {
        let (pair, principal_id) = test_pair(Domain::Admin);
        let claims = verify_refresh_signature(&test_keys(), &test_config(), &pair.refresh_token)
            .expect("valid refresh signature");
        assert_eq!(claims.token_id, "refresh-value");
        assert_eq!(claims.principal_id, principal_id);
        assert_eq!(claims.domain, Domain::Admin);
    }

    #[test]
    fn expired_token_is_invalid() {
        let keys = test_keys();
        let config = test_config();
        let token = sign_token(
            &keys,
            &config,
            Uuid::new_v4(),
            "alice@example.com",
            Domain::User,
            USE_ACCESS,
            "expired-token",
            "2020-01-01T00:00:00Z",
        )
        .expect("signed token");
        let result = verify_session(&keys, &config, &token, Domain::User);
        assert_eq!(result.err(), Some(AuthError::InvalidToken));
    }

    #[test]
    fn wrong_issuer_is_invalid() {
        let keys = test_keys();
        let (pair, _) = test_pair(Domain::User);
        let other_config = test_config().with_issuer("someone-else".to_string());
        let result = verify_session(&keys, &other_config, &pair.access_token, Domain::User);
        assert_eq!(result.err(), Some(AuthError::InvalidToken));
    }

    #[test]
    fn wrong_key_is_invalid() {
        let (pair, _) = test_pair(Domain::User);
        let other_keys = SessionKeys::from_seed([9u8; 32]).expect("session keys");
        let result = verify_session(
            &other_keys,
            &test_config(),
            &pair.access_token,
            Domain::User,
        );
        assert_eq!(result.err(), Some(AuthError::InvalidToken));
    }

    #[test]
    fn tampered_token_is_invalid() {
        let (pair, _) = test_pair(Domain::User);
        let mut tampered = pair.access_token.clone();
        let flipped = if tampered.ends_with('A') { 'B' } else { 'A' };
        tampered.pop();
        tampered.push(flipped);
        let result = verify_session(&test_keys(), &test_config(), &tampered, Domain::User);
        assert_eq!(result.err(), Some(AuthError::InvalidToken));
    }

    #[test]
    fn garbage_input_is_invalid() {
        let result = verify_session(
            &test_keys(),
            &test_config(),
            "not-a-token",
            Domain::User,
        );
        assert_eq!(result.err(), Some(AuthError::InvalidToken));
    }

    #[test]
    fn expiry_requires_positive_ttl() {
        assert!(expiry_rfc3339(0).is_err());
        assert!(expiry_rfc3339(-5).is_err());
        assert!(expiry_rfc3339(60).is_ok());
    }
}
