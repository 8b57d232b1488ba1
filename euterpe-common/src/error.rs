//! Common error types for Euterpe

use thiserror::Error;

/// Common result type for Euterpe operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Euterpe components
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound HTTP request error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Content or reference store operation error
    #[error("Store error: {0}")]
    Store(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
