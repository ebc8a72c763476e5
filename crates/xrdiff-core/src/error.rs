//! Error types for xrdiff-core

use thiserror::Error;

/// Result type for xrdiff-core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while interpreting dynamic objects
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// The object is missing apiVersion, kind, or another structural field
    #[error("invalid resource: {0}")]
    InvalidResource(String),

    /// A required nested field was absent
    #[error("missing field '{path}' in {kind}")]
    MissingField { kind: String, path: String },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for CoreError {
    fn from(e: serde_yaml::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}
