//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Identifier was empty or whitespace
    #[error("Invalid {field}: identifier must not be empty")]
    EmptyIdentifier { field: String },

    /// Unknown stage status string
    #[error("Invalid status: {value} (expected in-progress, success or error)")]
    InvalidStatus { value: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
