//! Layered error definitions
//!
//! Categorized by source: config / protocol / geometry

use thiserror::Error;

/// Unified contract-level error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Protocol Errors =====
    /// Inbound envelope could not be decoded
    #[error("malformed message: {message}")]
    MalformedMessage { message: String },

    /// Image payload could not be decoded
    #[error("invalid image payload from '{device_id}': {message}")]
    ImagePayload { device_id: String, message: String },

    /// Outbound message could not be encoded
    #[error("failed to encode '{kind}' message: {message}")]
    Encode { kind: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create malformed message error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedMessage {
            message: message.into(),
        }
    }

    /// Create image payload error
    pub fn image_payload(device_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ImagePayload {
            device_id: device_id.into(),
            message: message.into(),
        }
    }

    /// Create encode error
    pub fn encode(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Encode {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Error reported by the external camera-geometry library
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeometryError {
    /// The routine ran but did not converge
    #[error("did not converge: {message}")]
    NotConverged { message: String },

    /// The routine rejected its inputs
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// The image could not be decoded
    #[error("undecodable image: {message}")]
    Decode { message: String },
}

impl GeometryError {
    pub fn not_converged(message: impl Into<String>) -> Self {
        Self::NotConverged {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// Outcome of an observer callback. Failures are logged by the caller and
/// never stop delivery to the remaining observers.
pub type ObserverResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
