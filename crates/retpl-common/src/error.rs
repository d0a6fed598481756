//! Error types and utilities for retpl

use thiserror::Error;

/// Result type alias for retpl operations
pub type Result<T> = std::result::Result<T, RetplError>;

/// Main error type for retpl operations
#[derive(Error, Debug)]
pub enum RetplError {
    /// Configuration related errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O related errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Logging related errors
    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),
}

impl RetplError {
    /// Create a configuration error with a message
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error wrapping an underlying error
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
