//! Single-user SSH shell gateway.
//!
//! Authenticates one allow-list of public keys, then hands each session
//! either an interactive shell on a pseudo-terminal or a one-shot command.
//! Port forwarding is always refused.

pub mod auth;
pub mod config;
pub mod error;
pub mod forward;
pub mod session;
pub mod ssh;
