//! In-memory storage backend.
//!
//! This module provides a thread-safe in-memory implementation of [`ContactStore`].
//! It is intended for embedded usage, tests, and as a reference implementation.

use std::sync::RwLock;

use crate::contact::{Contact, ContactId, ContactUpdate, NewContact};
use crate::storage::index::{ContactIndex, ContactSnapshot};
use crate::storage::traits::{ContactStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory contact store.
#[derive(Debug, Default)]
pub struct InMemoryContactStore {
    state: RwLock<ContactIndex>,
}

impl InMemoryContactStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot (ids and `next_id` are preserved).
    ///
    /// # Errors
    /// Returns `InvalidRecord` or `DuplicateKey` if the snapshot is inconsistent.
    pub fn from_snapshot(snapshot: ContactSnapshot) -> Result<Self, StorageError> {
        Ok(Self {
            state: RwLock::new(ContactIndex::from_snapshot(snapshot)?),
        })
    }

    /// Copy out the current contents.
    ///
    /// # Errors
    /// Returns `BackendError` if the lock is poisoned.
    pub fn snapshot(&self) -> Result<ContactSnapshot, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contact.snapshot"))?;
        Ok(state.snapshot())
    }
}

impl ContactStore for InMemoryContactStore {
    fn insert(&self, contact: NewContact) -> Result<Contact, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("contact.insert"))?;
        let row = state.prepare_insert(contact)?;
        state.restore(row.clone())?;
        Ok(row)
    }

    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contact.get"))?;
        Ok(state.get(id).cloned())
    }

    fn find_by_email(&self, email: &str) -> Result<Vec<Contact>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contact.find_by_email"))?;
        Ok(state.find_by_email(email))
    }

    fn find_by_phone(&self, phone_number: &str) -> Result<Vec<Contact>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contact.find_by_phone"))?;
        Ok(state.find_by_phone(phone_number))
    }

    fn find_by_linked_id(&self, primary: ContactId) -> Result<Vec<Contact>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("contact.find_by_linked_id"))?;
        Ok(state.find_by_linked_id(primary))
    }

    fn bulk_update(&self, updates: Vec<ContactUpdate>) -> Result<Vec<Contact>, StorageError> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }
        let mut state = self.state.write().map_err(|_| lock_err("contact.bulk_update"))?;
        let rows = state.prepare_batch(&updates)?;
        state.apply_rows(rows.clone())?;
        Ok(rows)
    }

    fn all(&self) -> Result<Vec<Contact>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contact.all"))?;
        Ok(state.all())
    }

    fn len(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contact.len"))?;
        Ok(state.len())
    }
}
