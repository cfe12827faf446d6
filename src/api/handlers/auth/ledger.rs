//! Token ledger: the persistent record of every issued credential artifact.
//!
//! Rows are append-only except for the single monotonic `used_at` flip
//! performed by `redeem`. Nothing is ever deleted; spent and expired rows
//! stay behind for audit and replay detection. Redemption is one
//! conditional UPDATE so two concurrent redeemers of the same value can
//! never both win.

use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

/// Closed set of ledger-tracked token kinds.
///
/// Access tokens are deliberately absent: they are stateless and never get
/// a ledger row.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TokenKind {
    Refresh,
    EmailVerification,
    PasswordReset,
    Otp,
}

impl TokenKind {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Refresh => "refresh",
            Self::EmailVerification => "email_verification",
            Self::PasswordReset => "password_reset",
            Self::Otp => "otp",
        }
    }
}

/// One issued credential artifact.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub kind: TokenKind,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub used_at: Option<OffsetDateTime>,
}

/// Result of an atomic redemption attempt.
///
/// The three failure cases are distinct on purpose: callers must be able
/// to log a replay (`AlreadyUsed`) differently from a stale (`Expired`) or
/// unknown (`NotFound`) value, even when the user-facing response is the
/// same for all three.
#[derive(Debug)]
pub enum RedeemOutcome {
    Redeemed(TokenRecord),
    NotFound,
    Expired,
    AlreadyUsed,
}

/// Insert a new ledger row inside an existing transaction.
///
/// `token_hash` must be the hash of a value the caller generated; raw
/// values never reach this module.
pub async fn issue_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    principal_id: Uuid,
    kind: TokenKind,
    token_hash: &[u8],
    ttl_seconds: i64,
) -> Result<TokenRecord> {
    let query = r"
        INSERT INTO tokens (principal_id, kind, token_hash, expires_at)
        VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'))
        RETURNING id, principal_id, created_at, expires_at, used_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(principal_id)
        .bind(kind.as_str())
        .bind(token_hash)
        .bind(ttl_seconds)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert token record")?;

    Ok(record_from_row(&row, kind))
}

/// Insert a new ledger row using its own short transaction.
pub async fn issue(
    pool: &PgPool,
    principal_id: Uuid,
    kind: TokenKind,
    token_hash: &[u8],
    ttl_seconds: i64,
) -> Result<TokenRecord> {
    let mut tx = pool.begin().await.context("begin issue transaction")?;
    let record = issue_in_tx(&mut tx, principal_id, kind, token_hash, ttl_seconds).await?;
    tx.commit().await.context("commit issue transaction")?;
    Ok(record)
}

/// Atomically find-and-mark a token by kind and hash.
///
/// The UPDATE only matches an unused, unexpired row, so at most one of N
/// concurrent redeemers observes `Redeemed`; the storage engine serializes
/// the rest onto the classification path.
pub async fn redeem_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    kind: TokenKind,
    token_hash: &[u8],
) -> Result<RedeemOutcome> {
    let query = r"
        UPDATE tokens
        SET used_at = NOW()
        WHERE kind = $1
          AND token_hash = $2
          AND used_at IS NULL
          AND expires_at > NOW()
        RETURNING id, principal_id, created_at, expires_at, used_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(kind.as_str())
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to redeem token")?;

    if let Some(row) = row {
        return Ok(RedeemOutcome::Redeemed(record_from_row(&row, kind)));
    }

    let query = r"
        SELECT used_at
        FROM tokens
        WHERE kind = $1 AND token_hash = $2
        ORDER BY created_at DESC
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(kind.as_str())
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to classify redemption miss")?;

    Ok(classify_miss(row.map(|row| row.get("used_at"))))
}

/// Owner-scoped redemption, used for OTP codes whose 6-digit space may
/// collide across owners.
pub async fn redeem_for_owner_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    principal_id: Uuid,
    kind: TokenKind,
    token_hash: &[u8],
) -> Result<RedeemOutcome> {
    let query = r"
        UPDATE tokens
        SET used_at = NOW()
        WHERE principal_id = $1
          AND kind = $2
          AND token_hash = $3
          AND used_at IS NULL
          AND expires_at > NOW()
        RETURNING id, principal_id, created_at, expires_at, used_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(principal_id)
        .bind(kind.as_str())
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to redeem owner-scoped token")?;

    if let Some(row) = row {
        return Ok(RedeemOutcome::Redeemed(record_from_row(&row, kind)));
    }

    let query = r"
        SELECT used_at
        FROM tokens
        WHERE principal_id = $1 AND kind = $2 AND token_hash = $3
        ORDER BY created_at DESC
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(principal_id)
        .bind(kind.as_str())
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to classify owner-scoped redemption miss")?;

    Ok(classify_miss(row.map(|row| row.get("used_at"))))
}

/// Void every live token of a kind for a principal (e.g. refresh tokens on
/// explicit logout). Spent rows are untouched; nothing is deleted.
pub async fn invalidate_all_of_kind(
    pool: &PgPool,
    principal_id: Uuid,
    kind: TokenKind,
) -> Result<u64> {
    let query = r"
        UPDATE tokens
        SET used_at = NOW()
        WHERE principal_id = $1
          AND kind = $2
          AND used_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(principal_id)
        .bind(kind.as_str())
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to invalidate tokens")?;
    Ok(result.rows_affected())
}

/// Resolve the owner's address for a token value, for per-address rate
/// limiting before redemption.
pub async fn lookup_owner_address(
    tx: &mut Transaction<'_, Postgres>,
    kind: TokenKind,
    token_hash: &[u8],
) -> Result<Option<String>> {
    let query = r"
        SELECT principals.email
        FROM tokens
        JOIN principals ON principals.id = tokens.principal_id
        WHERE tokens.kind = $1 AND tokens.token_hash = $2
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(kind.as_str())
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to lookup token owner address")?;
    Ok(row.map(|row| row.get("email")))
}

/// Classify a redemption miss from the latest matching row, if any.
///
/// A spent token is a replay even when it has also expired since; replay
/// detection takes priority over staleness.
fn classify_miss(found: Option<Option<OffsetDateTime>>) -> RedeemOutcome {
    match found {
        None => RedeemOutcome::NotFound,
        Some(Some(_)) => RedeemOutcome::AlreadyUsed,
        Some(None) => RedeemOutcome::Expired,
    }
}

fn record_from_row(row: &PgRow, kind: TokenKind) -> TokenRecord {
    TokenRecord {
        id: row.get("id"),
        principal_id: row.get("principal_id"),
        kind,
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        used_at: row.get("used_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_kind_tags_are_stable() {
        assert_eq!(TokenKind::Refresh.as_str(), "refresh");
        assert_eq!(TokenKind::EmailVerification.as_str(), "email_verification");
        assert_eq!(TokenKind::PasswordReset.as_str(), "password_reset");
        assert_eq!(TokenKind::Otp.as_str(), "otp");
    }

    #[test]
    fn classify_miss_distinguishes_all_failures() {
        assert!(matches!(classify_miss(None), RedeemOutcome::NotFound));
        assert!(matches!(
            classify_miss(Some(Some(OffsetDateTime::UNIX_EPOCH))),
            RedeemOutcome::AlreadyUsed
        ));
        assert!(matches!(
            classify_miss(Some(None)),
            RedeemOutcome::Expired
        ));
    }
}
