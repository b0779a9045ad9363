//! Configuration Error Types
//!
//! Errors raised while loading and validating tenancy configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Underlying `config` crate failed to read or merge a source
    #[error("Failed to load configuration from '{directory}': {error}")]
    LoadFailed { directory: PathBuf, error: String },

    /// Sources merged but did not match the expected shape
    #[error("Failed to deserialize configuration: {error}")]
    DeserializeFailed { error: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },
}

impl ConfigurationError {
    pub fn load_failed<E: std::fmt::Display>(directory: PathBuf, error: E) -> Self {
        Self::LoadFailed {
            directory,
            error: error.to_string(),
        }
    }

    pub fn deserialize_failed<E: std::fmt::Display>(error: E) -> Self {
        Self::DeserializeFailed {
            error: error.to_string(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value<F: Into<String>, V: Into<String>, C: Into<String>>(
        field: F,
        value: V,
        context: C,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigurationError>;
