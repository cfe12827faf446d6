//! Credential store: principals and their hashed secrets.
//!
//! The store is the sole writer of `principals`. Addresses are unique per
//! domain only; the same email may exist as both a user and an admin, and
//! no lookup here ever crosses domains. Secrets are stored as salted
//! argon2id hashes and compared through the hasher, never as plaintext.

use anyhow::{Context, Result, anyhow};
use argon2::password_hash::{PasswordHash, SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

use super::types::Domain;
use super::utils::{is_unique_violation, sentinel_address};

/// A domain-tagged authenticable identity.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: Uuid,
    pub domain: Domain,
    pub email: String,
    pub password_hash: String,
    pub active: bool,
    pub email_verified_at: Option<OffsetDateTime>,
}

/// Outcome when attempting to create a new principal.
#[derive(Debug)]
pub enum CreateOutcome {
    Created(Principal),
    Conflict,
}

/// Look up a principal by address within one domain.
pub async fn find_by_address(
    pool: &PgPool,
    domain: Domain,
    email: &str,
) -> Result<Option<Principal>> {
    let query = "SELECT id, domain, email, password_hash, active, email_verified_at \
         FROM principals WHERE domain = $1 AND email = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(domain.as_str())
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup principal by address")?;

    row.map(|row| principal_from_row(&row)).transpose()
}

/// Look up a principal by id, domain-agnostic (ids are globally unique).
pub async fn find_by_id(pool: &PgPool, principal_id: Uuid) -> Result<Option<Principal>> {
    let query = "SELECT id, domain, email, password_hash, active, email_verified_at \
         FROM principals WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(principal_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup principal by id")?;

    row.map(|row| principal_from_row(&row)).transpose()
}

/// Create a principal inside an existing transaction.
///
/// Returns `Conflict` when the address is already registered in this
/// domain; the same address in the other domain is not a conflict.
pub async fn create_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    domain: Domain,
    email: &str,
    password: &str,
) -> Result<CreateOutcome> {
    let password_hash = hash_secret(password)?;

    let query = r"
        INSERT INTO principals (domain, email, password_hash)
        VALUES ($1, $2, $3)
        RETURNING id, domain, email, password_hash, active, email_verified_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(domain.as_str())
        .bind(email)
        .bind(&password_hash)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(CreateOutcome::Created(principal_from_row(&row)?)),
        Err(err) if is_unique_violation(&err) => Ok(CreateOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert principal"),
    }
}

/// Create a principal using its own short transaction.
pub async fn create(
    pool: &PgPool,
    domain: Domain,
    email: &str,
    password: &str,
) -> Result<CreateOutcome> {
    let mut tx = pool.begin().await.context("begin create transaction")?;
    let outcome = create_in_tx(&mut tx, domain, email, password).await?;
    match outcome {
        CreateOutcome::Created(_) => {
            tx.commit().await.context("commit create transaction")?;
        }
        CreateOutcome::Conflict => {
            let _ = tx.rollback().await;
        }
    }
    Ok(outcome)
}

/// Compare a candidate secret against the stored hash.
///
/// Verification runs through argon2 (constant-time digest comparison);
/// a malformed stored hash counts as a failed match, never as a panic.
#[must_use]
pub fn verify_secret(principal: &Principal, candidate: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(&principal.password_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(candidate.as_bytes(), &parsed)
        .is_ok()
}

/// Store a fresh salted hash for the principal.
///
/// Outstanding refresh tokens stay valid; revocation is the rotation
/// coordinator's job, not this store's.
pub async fn update_secret_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    principal_id: Uuid,
    new_password: &str,
) -> Result<()> {
    let password_hash = hash_secret(new_password)?;

    let query = r"
        UPDATE principals
        SET password_hash = $2,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(principal_id)
        .bind(&password_hash)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to update secret")?;
    Ok(())
}

/// Flip the active flag.
pub async fn set_active(pool: &PgPool, principal_id: Uuid, active: bool) -> Result<()> {
    let query = r"
        UPDATE principals
        SET active = $2,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(principal_id)
        .bind(active)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to set active flag")?;
    Ok(())
}

/// Close an account: deactivate and rewrite the address to its sentinel
/// form so the original address becomes reusable. The row itself stays.
pub async fn deactivate(pool: &PgPool, principal_id: Uuid) -> Result<()> {
    let query = r"
        UPDATE principals
        SET active = FALSE,
            email = $2,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(principal_id)
        .bind(sentinel_address(principal_id))
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to deactivate principal")?;
    Ok(())
}

/// Record a successful email verification.
pub async fn mark_email_verified_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    principal_id: Uuid,
) -> Result<()> {
    let query = r"
        UPDATE principals
        SET email_verified_at = NOW(),
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(principal_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to mark email verified")?;
    Ok(())
}

fn hash_secret(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash secret: {err}"))?;
    Ok(hash.to_string())
}

fn principal_from_row(row: &PgRow) -> Result<Principal> {
    let tag: String = row.get("domain");
    let domain =
        Domain::from_tag(&tag).ok_or_else(|| anyhow!("unknown principal domain tag: {tag}"))?;
    Ok(Principal {
        id: row.get("id"),
        domain,
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        active: row.get("active"),
        email_verified_at: row.get("email_verified_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_principal(password_hash: String) -> Principal {
        Principal {
            id: Uuid::nil(),
            domain: Domain::User,
            email: "alice@example.com".to_string(),
            password_hash,
            active: true,
            email_verified_at: None,
        }
    }

    #[test]
    fn hash_secret_produces_salted_phc_string() {
        let first = hash_secret("correct horse").expect("hash");
        let second = hash_secret("correct horse").expect("hash");
        assert!(first.starts_with("$argon2"));
        // Fresh salt every time: identical inputs never share a hash.
        assert_ne!(first, second);
        assert_ne!(first, "correct horse");
    }

    #[test]
    fn verify_secret_accepts_matching_password() {
        let hash = hash_secret("correct horse").expect("hash");
        let principal = test_principal(hash);
        assert!(verify_secret(&principal, "correct horse"));
        assert!(!verify_secret(&principal, "wrong horse"));
    }

    #[test]
    fn verify_secret_rejects_malformed_hash() {
        let principal = test_principal("not-a-phc-string".to_string());
        assert!(!verify_secret(&principal, "anything"));
    }

    #[test]
    fn create_outcome_debug_names() {
        assert_eq!(format!("{:?}", CreateOutcome::Conflict), "Conflict");
    }
}
