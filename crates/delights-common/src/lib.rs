//! # Divine Delights Common
//!
//! Shared plumbing for the storefront crates: the storage error type,
//! logging setup, and the backoff used when re-running a failed install.

use thiserror::Error;

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_with_backoff_if, RetryConfig};

/// Error shared by the on-disk stores (cache snapshot, local storage) and
/// process setup.
#[derive(Error, Debug)]
pub enum DelightsError {
    /// A store could not be read or written.
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Process setup failed.
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl DelightsError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Short category name for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            DelightsError::Storage { .. } => "storage",
            DelightsError::Config(_) => "config",
            DelightsError::Io(_) => "io",
            DelightsError::InvalidArgument(_) => "invalid_argument",
        }
    }
}

pub type Result<T> = std::result::Result<T, DelightsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_categories() {
        assert_eq!(DelightsError::storage("full").category(), "storage");
        assert_eq!(DelightsError::config("twice").category(), "config");
        let io: DelightsError = std::io::Error::other("disk").into();
        assert_eq!(io.category(), "io");
    }

    #[test]
    fn test_storage_error_keeps_source() {
        let cause = truncated_input();
        let err = DelightsError::storage_with_source("corrupt cache snapshot", cause);
        assert_eq!(err.to_string(), "Storage error: corrupt cache snapshot");
        assert!(err.source().is_some());
        assert!(DelightsError::storage("full").source().is_none());
    }

    fn truncated_input() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "unexpected end of input")
    }
}
