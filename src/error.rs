//! Error types for the trading bot

use thiserror::Error;

/// Bot error type
#[derive(Debug, Error)]
pub enum BotError {
    /// Transient upstream failure (timeout, 429, 5xx)
    #[error("API error: {0}")]
    Api(String),

    /// Malformed payload from an external service
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Persistent store error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Referential integrity violation (missing experiment run, FK failure)
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BotError {
    /// Errors that should halt new scans but leave resolution and the
    /// management CLI available.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BotError::Internal(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, BotError>;
