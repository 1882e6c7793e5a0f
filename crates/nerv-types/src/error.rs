//! Shared error types for the nerv system.

use thiserror::Error;

/// Top-level error type for the nerv system.
#[derive(Error, Debug)]
pub enum NervError {
    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Alias for Result with NervError.
pub type NervResult<T> = Result<T, NervError>;
