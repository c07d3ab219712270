//! Durable [`ContactStore`] implementation.
//!
//! The store wraps:
//! - an in-memory [`ContactIndex`] serving every read
//! - a [`WriteAheadLog`] that records each mutation before it is applied
//! - snapshot files produced by compaction

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockWriteGuard};

use tracing::{debug, info, warn};

use crate::contact::{Contact, ContactId, ContactUpdate, NewContact};
use crate::storage::index::ContactIndex;
use crate::storage::traits::{ContactStore, StorageError};

use super::file_lock::DirectoryLock;
use super::snapshot;
use super::wal::{WalRecord, WriteAheadLog};
use super::PersistentConfig;

const WAL_FILE: &str = "contacts.wal";

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

fn io_err(context: &str, err: &std::io::Error) -> StorageError {
    StorageError::BackendError(format!("{context}: {err}"))
}

/// Outcome of [`PersistentContactStore::compact`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    /// Contacts written to the snapshot.
    pub contacts_written: usize,
    /// WAL sequence covered by the snapshot.
    pub sequence: u64,
    /// Committed snapshot file.
    pub snapshot_path: PathBuf,
    /// WAL size before truncation, in bytes.
    pub wal_size_before: u64,
    /// WAL size after truncation, in bytes.
    pub wal_size_after: u64,
}

/// Contact store persisted in a directory (WAL + snapshot).
#[derive(Debug)]
pub struct PersistentContactStore {
    dir: PathBuf,
    _lock: DirectoryLock,
    wal: WriteAheadLog,
    state: RwLock<ContactIndex>,
    config: PersistentConfig,
}

impl PersistentContactStore {
    /// Opens or creates a store in `dir`, replaying snapshot and WAL.
    ///
    /// # Errors
    /// - If the directory cannot be created or accessed
    /// - If another process holds the lock
    /// - If the snapshot or WAL is corrupted
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| io_err("failed to create store directory", &e))?;
        let lock = DirectoryLock::acquire(dir).map_err(|e| io_err("failed to acquire lock", &e))?;

        let (mut index, covered) = match snapshot::load(dir)
            .map_err(|e| io_err("failed to load snapshot", &e))?
        {
            Some(loaded) => (
                ContactIndex::from_snapshot(loaded.data)?,
                loaded.header.sequence,
            ),
            None => (ContactIndex::default(), 0),
        };

        let (wal, entries) = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)
            .map_err(|e| io_err("failed to open WAL", &e))?;

        wal.advance_to(covered)
            .map_err(|e| io_err("failed to read WAL sequence", &e))?;

        let mut replayed = 0usize;
        for entry in entries.into_iter().filter(|e| e.sequence > covered) {
            match entry.record {
                WalRecord::Insert(contact) => index.restore(contact)?,
                WalRecord::Relink { rows } => index.apply_rows(rows)?,
                WalRecord::Checkpoint { .. } => continue,
            }
            replayed += 1;
        }

        info!(
            dir = %dir.display(),
            contacts = index.len(),
            snapshot_sequence = covered,
            replayed,
            "opened persistent contact store"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            wal,
            state: RwLock::new(index),
            config,
        })
    }

    /// The store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current WAL size in bytes.
    ///
    /// # Errors
    /// Returns `BackendError` if the file cannot be inspected.
    pub fn wal_size(&self) -> Result<u64, StorageError> {
        self.wal.size_bytes().map_err(|e| io_err("failed to stat WAL", &e))
    }

    /// Writes a snapshot of the current contents and truncates the WAL.
    ///
    /// Safe to call at any time: if it fails partway through, the WAL still holds
    /// every mutation and will be replayed on the next open.
    ///
    /// # Errors
    /// Returns `BackendError` on I/O failure.
    pub fn compact(&self) -> Result<CompactionResult, StorageError> {
        let state = self.state.write().map_err(|_| lock_err("contact.compact"))?;
        self.compact_locked(&state)
    }

    fn compact_locked(&self, state: &ContactIndex) -> Result<CompactionResult, StorageError> {
        let wal_size_before = self.wal_size()?;
        let sequence = self
            .wal
            .current_sequence()
            .map_err(|e| io_err("failed to read WAL sequence", &e))?;

        let data = state.snapshot();
        let contacts_written = data.contacts.len();
        let snapshot_path = snapshot::write(&self.dir, sequence, &data)
            .map_err(|e| io_err("failed to write snapshot", &e))?;
        self.wal
            .truncate(sequence)
            .map_err(|e| io_err("failed to truncate WAL", &e))?;
        let wal_size_after = self.wal_size()?;

        info!(
            contacts = contacts_written,
            sequence,
            wal_size_before,
            wal_size_after,
            "compacted contact store"
        );

        Ok(CompactionResult {
            contacts_written,
            sequence,
            snapshot_path,
            wal_size_before,
            wal_size_after,
        })
    }

    /// Runs auto compaction once a write is durable. Failures are logged and
    /// the WAL is left in place for the next attempt.
    fn after_write(&self, state: &RwLockWriteGuard<'_, ContactIndex>) {
        if !self.config.auto_compact {
            return;
        }
        let size = match self.wal_size() {
            Ok(size) => size,
            Err(err) => {
                warn!(error = %err, "skipping auto compaction");
                return;
            }
        };
        if size > self.config.max_wal_size {
            debug!(size, limit = self.config.max_wal_size, "WAL over limit; compacting");
            if let Err(err) = self.compact_locked(state) {
                warn!(error = %err, wal_size = size, "auto compaction failed; WAL retained");
            }
        }
    }

    fn append(&self, record: WalRecord) -> Result<u64, StorageError> {
        self.wal
            .append(record)
            .map_err(|e| io_err("failed to append to WAL", &e))
    }
}

impl ContactStore for PersistentContactStore {
    fn insert(&self, contact: NewContact) -> Result<Contact, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("contact.insert"))?;
        let row = state.prepare_insert(contact)?;
        self.append(WalRecord::Insert(row.clone()))?;
        state.restore(row.clone())?;
        self.after_write(&state);
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
        self.append(WalRecord::Relink { rows: rows.clone() })?;
        state.apply_rows(rows.clone())?;
        self.after_write(&state);
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
