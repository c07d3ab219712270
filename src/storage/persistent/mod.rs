//! Persistent storage backend.
//!
//! This module provides durable, crash-safe contact storage with:
//! - Write-Ahead Logging (WAL) for crash recovery
//! - File locking for single-process access
//! - CRC32 checksums for corruption detection
//! - Snapshot compaction to bound WAL growth
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                PersistentContactStore                │
//! ├──────────────────────────────────────────────────────┤
//! │  ┌────────────────┐  ┌────────────────┐              │
//! │  │ ContactIndex   │  │ WriteAheadLog  │              │
//! │  │ (all reads)    │  │ (append-only)  │              │
//! │  └────────────────┘  └───────┬────────┘              │
//! │                              │ compact               │
//! │                      ┌───────▼────────┐              │
//! │                      │ snapshot.ctid  │              │
//! │                      └────────────────┘              │
//! │              DirectoryLock (flock / LockFileEx)      │
//! └──────────────────────────────────────────────────────┘
//! ```

mod codec;
mod file_lock;
mod snapshot;
mod store;
mod wal;

pub use file_lock::DirectoryLock;
pub use snapshot::{LoadedSnapshot, SnapshotHeader};
pub use store::{CompactionResult, PersistentContactStore};
pub use wal::{WalEntry, WalRecord, WriteAheadLog};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::storage::StorageError;

/// Configuration for persistent storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    /// WAL size (bytes) above which `auto_compact` triggers a snapshot.
    pub max_wal_size: u64,
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
    /// Compact automatically once the WAL exceeds `max_wal_size`.
    pub auto_compact: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 64 * 1024 * 1024, // 64 MB
            sync_on_write: true,
            auto_compact: true,
        }
    }
}

impl PersistentConfig {
    const MIN_WAL_SIZE: u64 = 4 * 1024; // avoids compacting on every write

    /// Checks the configuration.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `max_wal_size` is below 4 KiB.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "max_wal_size must be at least {} bytes (got {})",
                    Self::MIN_WAL_SIZE,
                    self.max_wal_size
                ),
            });
        }
        Ok(self)
    }
}

/// Open or create a persistent contact store at the given path.
///
/// # Arguments
/// * `path` - Directory to store the database files
/// * `config` - Optional configuration (uses defaults if None)
///
/// # Errors
/// - If the configuration is invalid
/// - If the path cannot be created or accessed
/// - If another process holds the lock
/// - If WAL replay fails due to corruption
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use contact_identity::storage::persistent::open_store;
/// use contact_identity::IdentityResolver;
///
/// let store = open_store("./contacts.db", None)?;
/// let resolver = IdentityResolver::new(Arc::new(store));
/// ```
pub fn open_store(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentContactStore, StorageError> {
    let cfg = config
        .unwrap_or_default()
        .validate()
        .map_err(|e| StorageError::BackendError(e.to_string()))?;
    PersistentContactStore::open(path.as_ref(), cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PersistentConfig::default().validate().is_ok());
    }

    #[test]
    fn test_tiny_wal_rejected() {
        let cfg = PersistentConfig {
            max_wal_size: 16,
            ..PersistentConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_wal_size"));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let cfg: PersistentConfig = serde_json::from_str(r#"{"sync_on_write": false}"#).unwrap();
        assert!(!cfg.sync_on_write);
        assert!(cfg.auto_compact);
        assert_eq!(cfg.max_wal_size, 64 * 1024 * 1024);
    }
}
