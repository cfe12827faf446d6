use clap::{Arg, Command};

pub const ARG_FRONTEND_URL: &str = "frontend-url";
pub const ARG_SESSION_SEED: &str = "session-seed";

/// Attach auth-related arguments (frontend origin, session signing seed).
#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_URL)
                .long(ARG_FRONTEND_URL)
                .help("Frontend base URL used for CORS and links embedded in emails")
                .default_value("http://localhost:5173")
                .env("WAYFARER_FRONTEND_URL"),
        )
        .arg(
            Arg::new(ARG_SESSION_SEED)
                .long(ARG_SESSION_SEED)
                .help("Base64-encoded 32-byte Ed25519 seed for session token signing")
                .long_help(
                    "Base64-encoded 32-byte Ed25519 seed for session token signing. \
                     All replicas must share the seed; rotating it invalidates every \
                     outstanding access and refresh token. A random seed is generated \
                     when omitted (single-instance development only).",
                )
                .env("WAYFARER_SESSION_SEED"),
        )
}
