use crate::cli::actions::Action;
use crate::cli::commands::auth::{ARG_FRONTEND_URL, ARG_SESSION_SEED};
use anyhow::Result;
use secrecy::SecretString;

/// Build the Action from parsed arguments.
///
/// # Errors
///
/// Returns an error if a required argument is missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: matches
            .get_one("dsn")
            .map(|s: &String| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --dsn"))?,
        frontend_url: matches
            .get_one(ARG_FRONTEND_URL)
            .map_or_else(|| "http://localhost:5173".to_string(), |s: &String| s.to_string()),
        session_seed: matches
            .get_one::<String>(ARG_SESSION_SEED)
            .map(|s| SecretString::from(s.clone())),
    })
}
