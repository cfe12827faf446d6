//! Auth configuration and shared state.

use std::sync::Arc;

use super::rate_limit::RateLimiter;
use super::tokens::SessionKeys;
use super::types::Domain;

const DEFAULT_USER_ACCESS_TTL_SECONDS: i64 = 30 * 60;
// Admin sessions sit in a separate trust tier with a deliberately longer
// access TTL; still far below the refresh TTL.
const DEFAULT_ADMIN_ACCESS_TTL_SECONDS: i64 = 4 * 60 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_VERIFY_TOKEN_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_OTP_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_ISSUER: &str = "wayfarer";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    issuer: String,
    user_access_ttl_seconds: i64,
    admin_access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    reset_token_ttl_seconds: i64,
    verify_token_ttl_seconds: i64,
    otp_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            issuer: DEFAULT_ISSUER.to_string(),
            user_access_ttl_seconds: DEFAULT_USER_ACCESS_TTL_SECONDS,
            admin_access_ttl_seconds: DEFAULT_ADMIN_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            verify_token_ttl_seconds: DEFAULT_VERIFY_TOKEN_TTL_SECONDS,
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_user_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.user_access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_admin_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.admin_access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_verify_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verify_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_otp_ttl_seconds(mut self, seconds: i64) -> Self {
        self.otp_ttl_seconds = seconds;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(crate) fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Access TTL per domain; the two tiers are never interchangeable.
    pub(crate) fn access_ttl_seconds(&self, domain: Domain) -> i64 {
        match domain {
            Domain::User => self.user_access_ttl_seconds,
            Domain::Admin => self.admin_access_ttl_seconds,
        }
    }

    pub(crate) fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    pub(crate) fn reset_token_ttl_seconds(&self) -> i64 {
        self.reset_token_ttl_seconds
    }

    pub(crate) fn verify_token_ttl_seconds(&self) -> i64 {
        self.verify_token_ttl_seconds
    }

    pub(crate) fn otp_ttl_seconds(&self) -> i64 {
        self.otp_ttl_seconds
    }
}

pub struct AuthState {
    config: AuthConfig,
    keys: SessionKeys,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, keys: SessionKeys, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            config,
            keys,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::NoopRateLimiter;
    use super::*;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new("https://wayfarer.dev".to_string());

        assert_eq!(config.frontend_base_url(), "https://wayfarer.dev");
        assert_eq!(config.issuer(), DEFAULT_ISSUER);
        assert_eq!(
            config.access_ttl_seconds(Domain::User),
            DEFAULT_USER_ACCESS_TTL_SECONDS
        );
        assert_eq!(
            config.access_ttl_seconds(Domain::Admin),
            DEFAULT_ADMIN_ACCESS_TTL_SECONDS
        );
        assert_eq!(config.refresh_ttl_seconds(), DEFAULT_REFRESH_TTL_SECONDS);
        assert_eq!(config.otp_ttl_seconds(), DEFAULT_OTP_TTL_SECONDS);

        let config = config
            .with_issuer("wayfarer-test".to_string())
            .with_user_access_ttl_seconds(60)
            .with_admin_access_ttl_seconds(120)
            .with_refresh_ttl_seconds(3600)
            .with_reset_token_ttl_seconds(90)
            .with_verify_token_ttl_seconds(91)
            .with_otp_ttl_seconds(92);

        assert_eq!(config.issuer(), "wayfarer-test");
        assert_eq!(config.access_ttl_seconds(Domain::User), 60);
        assert_eq!(config.access_ttl_seconds(Domain::Admin), 120);
        assert_eq!(config.refresh_ttl_seconds(), 3600);
        assert_eq!(config.reset_token_ttl_seconds(), 90);
        assert_eq!(config.verify_token_ttl_seconds(), 91);
        assert_eq!(config.otp_ttl_seconds(), 92);
    }

    #[test]
    fn admin_access_ttl_exceeds_user_tier() {
        let config = AuthConfig::new("https://wayfarer.dev".to_string());
        assert!(config.access_ttl_seconds(Domain::Admin) > config.access_ttl_seconds(Domain::User));
        assert!(config.refresh_ttl_seconds() > config.access_ttl_seconds(Domain::Admin));
    }

    #[test]
    fn auth_state_constructs_with_noop_rate_limiter() {
        let config = AuthConfig::new("https://wayfarer.dev".to_string());
        let keys = SessionKeys::from_seed([7u8; 32]).expect("session keys");
        let state = AuthState::new(config, keys, Arc::new(NoopRateLimiter));
        assert_eq!(state.config().issuer(), DEFAULT_ISSUER);
    }
}
