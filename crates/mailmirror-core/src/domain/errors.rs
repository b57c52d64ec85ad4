//! Domain error types
//!
//! Validation failures raised while constructing domain values.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Archive-relative path is empty, absolute, or escapes the archive
    #[error("Invalid archive path: {0}")]
    InvalidPath(String),

    /// Remote identifier is empty or malformed
    #[error("Invalid remote ID: {0}")]
    InvalidRemoteId(String),

    /// Delta cursor or page token is empty
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// Stored enum value could not be recognised
    #[error("Unknown {kind} value: {value}")]
    UnknownVariant {
        /// The enum being parsed
        kind: &'static str,
        /// The unrecognised stored value
        value: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
