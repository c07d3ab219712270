//! Error types for contact identity resolution.
//!
//! Errors are split by where they originate: request validation, resolver
//! execution, and the storage layer (see [`crate::storage::StorageError`]).
//! [`IdentityError`] wraps the first two for callers of the resolver.

use thiserror::Error;

use crate::contact::ContactId;
use crate::storage::StorageError;

/// Validation errors raised before any storage access.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("At least one of email or phoneNumber is required")]
    MissingIdentifier,

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors raised while resolving an identity.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Contact not found: {id}")]
    ContactNotFound {
        id: ContactId,
    },

    #[error("No contact cluster matches {identifiers}")]
    ClusterNotFound {
        identifiers: String,
    },

    #[error("Matches roll up to {} distinct primaries: {}", .candidates.len(), display_ids(.candidates))]
    AmbiguousPrimary {
        candidates: Vec<ContactId>,
    },

    #[error("Contact {id} links to missing or non-primary contact {linked_id}")]
    BrokenLink {
        id: ContactId,
        linked_id: ContactId,
    },

    #[error("Merge exceeded {max_steps} steps")]
    MergeLimitExceeded {
        max_steps: usize,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

fn display_ids(ids: &[ContactId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Top-level error type returned by the resolver.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl From<StorageError> for IdentityError {
    fn from(err: StorageError) -> Self {
        Self::Execution(ExecutionError::Storage(err))
    }
}

impl IdentityError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if retrying the same request may succeed.
    ///
    /// Only a batch rejected because another writer got there first qualifies;
    /// everything else fails the same way on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Execution(ExecutionError::Storage(StorageError::StaleWrite { .. }))
        )
    }

    /// HTTP status an outer layer should answer with.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Execution(ExecutionError::Storage(StorageError::StaleWrite { .. })) => 409,
            Self::Execution(_) | Self::Internal { .. } => 500,
        }
    }
}

/// Result type alias for resolver operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
