//! # Wayfarer (Credential & Token Authority)
//!
//! `wayfarer` is the credential and token lifecycle service for the Wayfarer
//! travel platform. It owns issuance, rotation, invalidation, and
//! verification of session credentials across two principal domains.
//!
//! ## Principal Domains
//!
//! Users and administrators are disjoint domains. An address registered in
//! one domain says nothing about the other, and a token minted for one
//! domain never authenticates a resource in the other. Every verification
//! site names the domain it expects; nothing is inferred from payload shape.
//!
//! ## Token Kinds
//!
//! - **Access tokens** are short-lived, stateless PASETO v4.public
//!   assertions. Verification is pure signature + claims work, no storage.
//! - **Refresh tokens** pair a signed envelope with a ledger row and are
//!   exchanged for a new session pair exactly once (rotation).
//! - **Email-verification, password-reset, and OTP tokens** are opaque
//!   single-use values tracked only in the ledger.
//!
//! Redeemed ledger rows are retained forever; a second redemption of the
//! same value is reported as a replay, never as a missing token.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
