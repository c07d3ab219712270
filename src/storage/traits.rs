//! Abstract storage trait for contacts.
//!
//! The resolver only ever talks to a [`ContactStore`]. By using a trait, we enable:
//! - An in-memory backend for tests and embedded use
//! - A persistent write-ahead-logged backend behind the `persistent` feature
//! - Relational backends provided by the embedding application

use thiserror::Error;

use crate::contact::{Contact, ContactId, ContactUpdate, NewContact};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Contact not found.
    #[error("Contact not found: {0}")]
    ContactNotFound(ContactId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// An update's expected link no longer matches the stored row.
    #[error("Stale write: contact {id} changed since it was read")]
    StaleWrite {
        /// The contact whose link moved underneath the writer.
        id: ContactId,
    },

    /// A record violates the contact row invariants.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Storage trait for contact rows.
///
/// # Consistency
/// - `insert` assigns ids in strictly increasing order
/// - `bulk_update` is all-or-nothing: if any update is rejected, no row changes
/// - Lookups return rows in ascending id order
pub trait ContactStore: Send + Sync {
    /// Insert a new contact, assigning it the next id. Returns the stored row.
    fn insert(&self, contact: NewContact) -> Result<Contact, StorageError>;

    /// Get a contact by id.
    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError>;

    /// Find contacts whose email equals `email` exactly.
    fn find_by_email(&self, email: &str) -> Result<Vec<Contact>, StorageError>;

    /// Find contacts whose phone number equals `phone_number` exactly.
    fn find_by_phone(&self, phone_number: &str) -> Result<Vec<Contact>, StorageError>;

    /// Find secondaries linked to `primary`.
    fn find_by_linked_id(&self, primary: ContactId) -> Result<Vec<Contact>, StorageError>;

    /// Apply a batch of link rewrites atomically. Returns the updated rows.
    ///
    /// # Errors
    /// - `ContactNotFound`: an update names an unknown id
    /// - `StaleWrite`: a stored link differs from the update's `expected` link
    /// - `InvalidRecord`: an update would leave a row inconsistent
    fn bulk_update(&self, updates: Vec<ContactUpdate>) -> Result<Vec<Contact>, StorageError>;

    /// All contacts in ascending id order.
    fn all(&self) -> Result<Vec<Contact>, StorageError>;

    /// Number of stored contacts.
    fn len(&self) -> Result<usize, StorageError>;

    /// Returns true when the store holds no contacts.
    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure the trait is object-safe
    fn _assert_contact_store_object_safe(_: &dyn ContactStore) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::ContactNotFound(ContactId::new(42));
        assert!(err.to_string().contains("Contact not found: 42"));

        let err = StorageError::StaleWrite { id: ContactId::new(3) };
        assert!(err.to_string().contains("contact 3"));

        let err = StorageError::BackendError("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }
}
