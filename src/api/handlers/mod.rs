//! API handlers for Wayfarer.

pub mod auth;
pub mod health;
pub mod root;
