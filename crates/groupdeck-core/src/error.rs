//! Error types shared across the workspace.

use thiserror::Error;

/// Workspace-wide error type.
#[derive(Debug, Error)]
pub enum DeckError {
    /// Configuration file missing, unreadable or malformed.
    #[error("Config error: {0}")]
    Config(String),

    /// Persistent store failure (open, migrate, query).
    #[error("Store error: {0}")]
    Store(String),

    /// Bridge service returned a hard error that could not be folded into
    /// a per-call outcome.
    #[error("Bridge error: {0}")]
    Bridge(String),

    /// Agent response backend failure.
    #[error("Agent error: {0}")]
    Agent(String),

    /// Event payload could not be decoded.
    #[error("Event decode error: {0}")]
    Event(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DeckError>;
