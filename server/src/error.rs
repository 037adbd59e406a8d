//! Failure taxonomy for command handling

use thiserror::Error;

/// Errors a handler can end a single command with.
///
/// None of these terminate the connection; the dispatcher turns them into a
/// failure reply. Frame read errors are handled by the read loop itself.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Bad credentials
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Malformed or zero-valued payload for a known command
    #[error("Invalid request: {0}")]
    Decode(String),

    /// Persistence read or write failed
    #[error("Store failure: {0}")]
    Store(#[from] anyhow::Error),

    /// Write to a peer's transport failed
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Connection-level protocol violation
    #[error("Protocol failure: {0}")]
    Protocol(String),

    /// Caller lacks the right to perform the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

impl ChatError {
    /// Short kind string sent to clients in failure replies.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::Auth(_) => "auth",
            ChatError::Decode(_) => "decode",
            ChatError::Store(_) => "store",
            ChatError::Transport(_) => "transport",
            ChatError::Protocol(_) => "protocol",
            ChatError::Forbidden(_) => "forbidden",
            ChatError::NotFound(_) => "not_found",
        }
    }

    /// Client-safe description. Store errors are not echoed verbatim so that
    /// SQL details stay in the server log.
    pub fn public_message(&self) -> String {
        match self {
            ChatError::Store(_) => "Request failed".to_string(),
            other => other.to_string(),
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
