//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Override produced an invalid configuration
    #[error("Invalid override for {field}: {message}")]
    InvalidOverride { field: String, message: String },

    /// Session could not be created or started
    #[error("Session '{session_id}' failed: {message}")]
    Session { session_id: String, message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn invalid_override(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOverride {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn session(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Session {
            session_id: session_id.into(),
            message: message.into(),
        }
    }
}
