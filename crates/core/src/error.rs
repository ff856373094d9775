//! Error types for the resource model.

use thiserror::Error;

/// Result type alias for resource model operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Resource model error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("resource is missing required metadata field '{field}'")]
    MissingMetadata { field: &'static str },

    #[error("invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },
}

impl Error {
    /// Create a missing metadata error.
    pub const fn missing_metadata(field: &'static str) -> Self {
        Self::MissingMetadata { field }
    }

    /// Create an invalid key error.
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
