//! Common error types for paceline

use thiserror::Error;

/// Common result type for paceline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the paceline services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error message)
    #[error("Database error: {0}")]
    Database(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Upstream service (tracking provider or relay) failure
    #[error("Upstream error {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build an upstream error from an HTTP status and a body excerpt.
    ///
    /// The body is truncated to 200 characters so logs and error payloads
    /// stay bounded even when the relay returns an HTML error page.
    pub fn upstream(status: u16, body: &str) -> Self {
        let excerpt: String = body.chars().take(200).collect();
        Error::Upstream {
            status,
            message: excerpt,
        }
    }
}
