//! Storage-backed tests for ledger redemption, rotation, and domain
//! isolation. These run against a disposable PostgreSQL named by
//! `DATABASE_URL` and skip silently when it is unset.

use sha2::{Digest, Sha256};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use uuid::Uuid;
use wayfarer::api::handlers::auth::credentials::{self, CreateOutcome, Principal};
use wayfarer::api::handlers::auth::ledger::{self, RedeemOutcome, TokenKind};
use wayfarer::api::handlers::auth::rotation;
use wayfarer::api::handlers::auth::types::Domain;
use wayfarer::api::handlers::auth::{AuthConfig, AuthError, AuthState, NoopRateLimiter, SessionKeys};

async fn test_pool() -> Option<PgPool> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping storage-backed test");
        return None;
    };
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await
        .expect("connect to test database");
    sqlx::migrate!().run(&pool).await.expect("run migrations");
    Some(pool)
}

fn test_state() -> AuthState {
    AuthState::new(
        AuthConfig::new("http://localhost:5173".to_string()),
        SessionKeys::from_seed([42u8; 32]).expect("session keys"),
        Arc::new(NoopRateLimiter),
    )
}

fn unique_email(prefix: &str) -> String {
    format!("{prefix}-{}@example.com", Uuid::new_v4())
}

fn sha256(value: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hasher.finalize().to_vec()
}

async fn create_user(pool: &PgPool, prefix: &str) -> Principal {
    match credentials::create(pool, Domain::User, &unique_email(prefix), "correct horse")
        .await
        .expect("create user")
    {
        CreateOutcome::Created(principal) => principal,
        CreateOutcome::Conflict => panic!("unique address conflicted"),
    }
}

async fn live_refresh_count(pool: &PgPool, principal_id: Uuid) -> i64 {
    sqlx::query(
        "SELECT COUNT(*) AS live FROM tokens \
         WHERE principal_id = $1 AND kind = 'refresh' AND used_at IS NULL",
    )
    .bind(principal_id)
    .fetch_one(pool)
    .await
    .expect("count live refresh tokens")
    .get("live")
}

#[tokio::test]
async fn concurrent_redeem_has_exactly_one_winner() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let principal = create_user(&pool, "race").await;

    let value = format!("race-token-{}", Uuid::new_v4());
    ledger::issue(&pool, principal.id, TokenKind::PasswordReset, &sha256(&value), 600)
        .await
        .expect("issue token");

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        let hash = sha256(&value);
        tasks.push(tokio::spawn(async move {
            let mut tx = pool.begin().await.expect("begin");
            let outcome = ledger::redeem_in_tx(&mut tx, TokenKind::PasswordReset, &hash)
                .await
                .expect("redeem");
            tx.commit().await.expect("commit");
            outcome
        }));
    }

    let mut winners = 0;
    let mut replays = 0;
    for task in tasks {
        match task.await.expect("join redeemer") {
            RedeemOutcome::Redeemed(record) => {
                assert_eq!(record.principal_id, principal.id);
                winners += 1;
            }
            RedeemOutcome::AlreadyUsed => replays += 1,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(winners, 1, "exactly one concurrent redeemer may win");
    assert_eq!(replays, 7);
}

#[tokio::test]
async fn rotation_chain_detects_replay_and_stays_atomic() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let state = test_state();
    let principal = create_user(&pool, "rotate").await;

    let pair1 = rotation::establish_session(&pool, &state, &principal)
        .await
        .expect("establish session");
    assert_eq!(live_refresh_count(&pool, principal.id).await, 1);

    let pair2 = rotation::rotate(&pool, &state, &pair1.refresh_token)
        .await
        .expect("first rotation succeeds");
    assert_eq!(live_refresh_count(&pool, principal.id).await, 1);

    // Replaying the retired token fails and must not mint anything.
    let replay = rotation::rotate(&pool, &state, &pair1.refresh_token).await;
    assert_eq!(replay.err(), Some(AuthError::AlreadyUsed));
    assert_eq!(live_refresh_count(&pool, principal.id).await, 1);

    // The successor is unaffected by the failed replay.
    rotation::rotate(&pool, &state, &pair2.refresh_token)
        .await
        .expect("successor still rotates");
    assert_eq!(live_refresh_count(&pool, principal.id).await, 1);
}

#[tokio::test]
async fn rotation_rejects_garbage_without_touching_the_ledger() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let state = test_state();
    let principal = create_user(&pool, "garbage").await;

    let result = rotation::rotate(&pool, &state, "v4.public.bogus").await;
    assert_eq!(result.err(), Some(AuthError::InvalidToken));
    assert_eq!(live_refresh_count(&pool, principal.id).await, 0);
}

#[tokio::test]
async fn expired_token_reports_expired_not_missing() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let principal = create_user(&pool, "expired").await;

    let value = format!("expired-token-{}", Uuid::new_v4());
    // Negative TTL: the row exists but its window is already closed.
    ledger::issue(&pool, principal.id, TokenKind::EmailVerification, &sha256(&value), -60)
        .await
        .expect("issue expired token");

    let mut tx = pool.begin().await.expect("begin");
    let outcome = ledger::redeem_in_tx(&mut tx, TokenKind::EmailVerification, &sha256(&value))
        .await
        .expect("redeem");
    tx.commit().await.expect("commit");
    assert!(matches!(outcome, RedeemOutcome::Expired));
}

#[tokio::test]
async fn otp_wrong_code_leaves_record_redeemable() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let principal = create_user(&pool, "otp").await;

    ledger::issue(&pool, principal.id, TokenKind::Otp, &sha256("123456"), 600)
        .await
        .expect("issue otp");

    let mut tx = pool.begin().await.expect("begin");
    let wrong = ledger::redeem_for_owner_in_tx(&mut tx, principal.id, TokenKind::Otp, &sha256("654321"))
        .await
        .expect("redeem wrong code");
    tx.commit().await.expect("commit");
    assert!(matches!(wrong, RedeemOutcome::NotFound));

    let mut tx = pool.begin().await.expect("begin");
    let right = ledger::redeem_for_owner_in_tx(&mut tx, principal.id, TokenKind::Otp, &sha256("123456"))
        .await
        .expect("redeem right code");
    tx.commit().await.expect("commit");
    assert!(matches!(right, RedeemOutcome::Redeemed(_)));

    let mut tx = pool.begin().await.expect("begin");
    let again = ledger::redeem_for_owner_in_tx(&mut tx, principal.id, TokenKind::Otp, &sha256("123456"))
        .await
        .expect("redeem spent code");
    tx.commit().await.expect("commit");
    assert!(matches!(again, RedeemOutcome::AlreadyUsed));
}

#[tokio::test]
async fn otp_codes_are_owner_scoped() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let alice = create_user(&pool, "otp-alice").await;
    let bob = create_user(&pool, "otp-bob").await;

    // Both owners legitimately hold the same 6-digit code.
    ledger::issue(&pool, alice.id, TokenKind::Otp, &sha256("777777"), 600)
        .await
        .expect("issue alice otp");
    ledger::issue(&pool, bob.id, TokenKind::Otp, &sha256("777777"), 600)
        .await
        .expect("issue bob otp");

    let mut tx = pool.begin().await.expect("begin");
    let outcome = ledger::redeem_for_owner_in_tx(&mut tx, alice.id, TokenKind::Otp, &sha256("777777"))
        .await
        .expect("redeem alice");
    tx.commit().await.expect("commit");
    assert!(matches!(outcome, RedeemOutcome::Redeemed(_)));

    // Alice spending her code must not consume Bob's.
    let mut tx = pool.begin().await.expect("begin");
    let outcome = ledger::redeem_for_owner_in_tx(&mut tx, bob.id, TokenKind::Otp, &sha256("777777"))
        .await
        .expect("redeem bob");
    tx.commit().await.expect("commit");
    assert!(matches!(outcome, RedeemOutcome::Redeemed(_)));
}

#[tokio::test]
async fn registration_conflicts_stay_within_one_domain() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let email = unique_email("isolated");

    let first = credentials::create(&pool, Domain::User, &email, "correct horse")
        .await
        .expect("create user");
    assert!(matches!(first, CreateOutcome::Created(_)));

    let duplicate = credentials::create(&pool, Domain::User, &email, "correct horse")
        .await
        .expect("create duplicate user");
    assert!(matches!(duplicate, CreateOutcome::Conflict));

    // The same address in the admin domain is not a conflict.
    let admin = credentials::create(&pool, Domain::Admin, &email, "correct horse")
        .await
        .expect("create admin");
    assert!(matches!(admin, CreateOutcome::Created(_)));
}

#[tokio::test]
async fn deactivation_frees_the_address_for_reuse() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let email = unique_email("closed");

    let principal = match credentials::create(&pool, Domain::User, &email, "correct horse")
        .await
        .expect("create user")
    {
        CreateOutcome::Created(principal) => principal,
        CreateOutcome::Conflict => panic!("unique address conflicted"),
    };

    credentials::deactivate(&pool, principal.id)
        .await
        .expect("deactivate");

    // The original address no longer resolves; the row survives under its
    // sentinel form.
    let gone = credentials::find_by_address(&pool, Domain::User, &email)
        .await
        .expect("lookup original address");
    assert!(gone.is_none());
    let closed = credentials::find_by_id(&pool, principal.id)
        .await
        .expect("lookup by id")
        .expect("row retained");
    assert!(!closed.active);
    assert!(closed.email.ends_with("@wayfarer.invalid"));

    let reuse = credentials::create(&pool, Domain::User, &email, "another horse")
        .await
        .expect("recreate user");
    assert!(matches!(reuse, CreateOutcome::Created(_)));
}

#[tokio::test]
async fn logout_invalidates_every_live_refresh_token() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let state = test_state();
    let principal = create_user(&pool, "logout").await;

    let pair_a = rotation::establish_session(&pool, &state, &principal)
        .await
        .expect("establish session a");
    let _pair_b = rotation::establish_session(&pool, &state, &principal)
        .await
        .expect("establish session b");
    assert_eq!(live_refresh_count(&pool, principal.id).await, 2);

    let revoked = rotation::revoke_all_sessions(&pool, principal.id)
        .await
        .expect("revoke sessions");
    assert_eq!(revoked, 2);
    assert_eq!(live_refresh_count(&pool, principal.id).await, 0);

    // A revoked token is a replay, not a missing one.
    let result = rotation::rotate(&pool, &state, &pair_a.refresh_token).await;
    assert_eq!(result.err(), Some(AuthError::AlreadyUsed));
}

#[tokio::test]
async fn inactive_principal_cannot_rotate() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let state = test_state();
    let principal = create_user(&pool, "inactive").await;

    let pair = rotation::establish_session(&pool, &state, &principal)
        .await
        .expect("establish session");

    credentials::set_active(&pool, principal.id, false)
        .await
        .expect("deactivate");

    let result = rotation::rotate(&pool, &state, &pair.refresh_token).await;
    assert_eq!(result.err(), Some(AuthError::Unauthorized));
    // The refresh token was not consumed by the failed attempt.
    assert_eq!(live_refresh_count(&pool, principal.id).await, 1);
}

#[tokio::test]
async fn stored_secrets_verify_and_update() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let principal = create_user(&pool, "secrets").await;

    assert!(credentials::verify_secret(&principal, "correct horse"));
    assert!(!credentials::verify_secret(&principal, "wrong horse"));

    let mut tx = pool.begin().await.expect("begin");
    credentials::update_secret_in_tx(&mut tx, principal.id, "fresh horse")
        .await
        .expect("update secret");
    tx.commit().await.expect("commit");

    let updated = credentials::find_by_id(&pool, principal.id)
        .await
        .expect("reload principal")
        .expect("principal exists");
    assert!(credentials::verify_secret(&updated, "fresh horse"));
    assert!(!credentials::verify_secret(&updated, "correct horse"));
}
