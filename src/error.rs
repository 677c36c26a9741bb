//! Session-level error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{reason}")]
    Pty { reason: String },

    #[error("failed to start {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("client channel closed")]
    ChannelClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
