use crate::api;
use crate::api::email::EmailWorkerConfig;
use crate::api::handlers::auth::{AuthConfig, SessionKeys};
use crate::cli::actions::Action;
use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

/// Handle the server action
///
/// # Errors
///
/// Returns an error if the signing seed is malformed or the server fails to start.
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            dsn,
            frontend_url,
            session_seed,
        } => {
            let seed = decode_seed(session_seed.as_ref())?;
            let keys = SessionKeys::from_seed(seed).context("Failed to build session keys")?;

            let auth_config = AuthConfig::new(frontend_url);
            let email_config = EmailWorkerConfig::new();

            api::new(port, dsn, keys, auth_config, email_config).await?;
        }
    }

    Ok(())
}

/// Decode the base64 seed argument, or generate a random one for dev use.
fn decode_seed(session_seed: Option<&SecretString>) -> Result<[u8; 32]> {
    let mut seed = [0u8; 32];
    match session_seed {
        Some(encoded) => {
            let bytes = STANDARD
                .decode(encoded.expose_secret())
                .context("session seed is not valid base64")?;
            if bytes.len() != seed.len() {
                return Err(anyhow!(
                    "session seed must decode to {} bytes, got {}",
                    seed.len(),
                    bytes.len()
                ));
            }
            seed.copy_from_slice(&bytes);
        }
        None => {
            // Tokens signed with an ephemeral seed die with the process.
            warn!("no session seed configured, generating an ephemeral signing key");
            OsRng
                .try_fill_bytes(&mut seed)
                .context("failed to generate session seed")?;
        }
    }
    Ok(seed)
}

#[cfg(test)]
mod tests {
    use super::decode_seed;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use secrecy::SecretString;

    #[test]
    fn decode_seed_accepts_32_bytes() {
        let encoded = SecretString::from(STANDARD.encode([7u8; 32]));
        let seed = decode_seed(Some(&encoded)).ok();
        assert_eq!(seed, Some([7u8; 32]));
    }

    #[test]
    fn decode_seed_rejects_wrong_length() {
        let encoded = SecretString::from(STANDARD.encode([7u8; 16]));
        assert!(decode_seed(Some(&encoded)).is_err());
    }

    #[test]
    fn decode_seed_rejects_invalid_base64() {
        let encoded = SecretString::from("not-base64!".to_string());
        assert!(decode_seed(Some(&encoded)).is_err());
    }

    #[test]
    fn decode_seed_generates_when_missing() {
        assert!(decode_seed(None).is_ok());
    }
}
