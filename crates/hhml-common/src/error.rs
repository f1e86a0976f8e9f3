//! Error types for HHML

use thiserror::Error;

/// Result type alias for HHML operations
pub type Result<T> = std::result::Result<T, HhmlError>;

/// Main error type for HHML
#[derive(Error, Debug)]
pub enum HhmlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A field required for keying or fingerprinting is absent or unusable
    #[error("Malformed record: field '{field}' {reason}")]
    MalformedRecord { field: String, reason: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

impl HhmlError {
    /// Shorthand for a missing required field
    pub fn missing(field: &str) -> Self {
        HhmlError::MalformedRecord {
            field: field.to_string(),
            reason: "is required".to_string(),
        }
    }

    /// Shorthand for a present but unusable field value
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        HhmlError::MalformedRecord {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
