//! Crash recovery tests for persistent storage.
//!
//! These tests verify that the storage layer correctly handles:
//! - Partial writes (simulated crash mid-write)
//! - CRC corruption detection
//! - Snapshot compaction, including a crash before the WAL is truncated
//! - Merges surviving a restart intact

#![cfg(feature = "persistent")]

use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use contact_identity::storage::{open_store, ContactStore, PersistentConfig};
use contact_identity::{ContactId, IdentifyRequest, IdentityResolver};
use tempfile::tempdir;

const WAL_FILE: &str = "contacts.wal";

fn config() -> Option<PersistentConfig> {
    Some(PersistentConfig {
        sync_on_write: false,
        ..PersistentConfig::default()
    })
}

fn identify(resolver: &IdentityResolver, email: &str, phone: &str) {
    resolver
        .identify(
            IdentifyRequest::builder()
                .email(email)
                .phone_number(phone)
                .build()
                .unwrap(),
        )
        .unwrap();
}

fn open_resolver(dir: &Path) -> IdentityResolver {
    IdentityResolver::new(Arc::new(open_store(dir, config()).unwrap()))
}

/// A record cut short at the end of the WAL is dropped; everything before it survives.
#[test]
fn test_partial_wal_entry_recovery() {
    let dir = tempdir().unwrap();
    let wal_path = dir.path().join(WAL_FILE);

    {
        let resolver = open_resolver(dir.path());
        for i in 0..5 {
            identify(&resolver, &format!("contact{i}@x.com"), &format!("55500{i}"));
        }
    }

    // Chop the tail of the last record (simulating crash mid-write)
    {
        let file = fs::OpenOptions::new().write(true).open(&wal_path).unwrap();
        let size = file.metadata().unwrap().len();
        file.set_len(size - 3).unwrap();
    }

    let store = open_store(dir.path(), config()).unwrap();
    assert_eq!(store.len().unwrap(), 4);
    assert!(store.find_by_email("contact4@x.com").unwrap().is_empty());

    // The trimmed log accepts new appends and ids continue after the survivors.
    let resolver = IdentityResolver::new(Arc::new(store));
    let summary = resolver
        .identify(
            IdentifyRequest::builder()
                .email("contact4@x.com")
                .build()
                .unwrap(),
        )
        .unwrap();
    assert_eq!(summary.primary_contact_id, ContactId::new(5));
}

/// A flipped bit inside a record fails the open instead of silently dropping data.
#[test]
fn test_crc_corruption_detection() {
    let dir = tempdir().unwrap();
    let wal_path = dir.path().join(WAL_FILE);

    {
        let resolver = open_resolver(dir.path());
        identify(&resolver, "doc@hillvalley.edu", "121121");
        identify(&resolver, "marty@hillvalley.edu", "121121");
    }

    {
        let mut content = Vec::new();
        fs::File::open(&wal_path)
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();

        // Skip the file header (5 bytes) and the first record's version and
        // length prefix (5 bytes); corrupt its JSON payload.
        content[12] ^= 0xFF;

        fs::File::create(&wal_path)
            .unwrap()
            .write_all(&content)
            .unwrap();
    }

    let err = open_store(dir.path(), config()).unwrap_err();
    let err_str = err.to_string();
    assert!(
        err_str.contains("CRC") || err_str.contains("corrupt"),
        "Error should mention CRC or corruption: {err_str}"
    );
}

/// Writes before and after a compaction all come back on reopen.
#[test]
fn test_compaction_recovery() {
    let dir = tempdir().unwrap();

    {
        let store = Arc::new(open_store(dir.path(), config()).unwrap());
        let resolver = IdentityResolver::new(store.clone());
        for i in 0..10 {
            identify(&resolver, &format!("before{i}@x.com"), &format!("100{i}"));
        }

        let result = store.compact().unwrap();
        assert_eq!(result.contacts_written, 10);
        assert!(result.wal_size_after < result.wal_size_before);

        for i in 0..5 {
            identify(&resolver, &format!("after{i}@x.com"), &format!("100{i}"));
        }
    }

    let store = open_store(dir.path(), config()).unwrap();
    assert_eq!(store.len().unwrap(), 15);
    for contact in store.find_by_phone("1003").unwrap() {
        assert_eq!(contact.primary_id(), ContactId::new(4));
    }
}

/// Crash after the snapshot is committed but before the WAL is truncated:
/// entries already in the snapshot must not be applied twice.
#[test]
fn test_crash_between_snapshot_and_truncate() {
    let dir = tempdir().unwrap();
    let wal_path = dir.path().join(WAL_FILE);
    let stale_wal;

    let before = {
        let store = Arc::new(open_store(dir.path(), config()).unwrap());
        let resolver = IdentityResolver::new(store.clone());
        identify(&resolver, "george@hillvalley.edu", "919191");
        identify(&resolver, "biffsucks@hillvalley.edu", "717171");
        identify(&resolver, "george@hillvalley.edu", "717171");

        stale_wal = fs::read(&wal_path).unwrap();
        store.compact().unwrap();
        store.all().unwrap()
    };

    // Put the pre-truncation log back, as if the process died mid-compaction.
    fs::write(&wal_path, &stale_wal).unwrap();

    let store = open_store(dir.path(), config()).unwrap();
    assert_eq!(store.all().unwrap(), before);
}

/// Small WAL limit forces automatic compaction during normal traffic.
#[test]
fn test_auto_compaction_keeps_everything() {
    let dir = tempdir().unwrap();
    let cfg = Some(PersistentConfig {
        max_wal_size: 4 * 1024,
        sync_on_write: false,
        auto_compact: true,
    });

    let before = {
        let store = Arc::new(open_store(dir.path(), cfg.clone()).unwrap());
        let resolver = IdentityResolver::new(store.clone());
        for i in 0..60 {
            identify(&resolver, &format!("user{}@x.com", i % 20), &format!("200{}", i % 7));
        }
        assert!(store.wal_size().unwrap() <= 4 * 1024 + 2048);
        assert!(resolver.audit().unwrap().is_empty());
        store.all().unwrap()
    };

    let store = open_store(dir.path(), cfg).unwrap();
    assert_eq!(store.all().unwrap(), before);
}

/// A merge is one WAL record: after reopen the graph is identical and valid.
#[test]
fn test_merge_survives_restart() {
    let dir = tempdir().unwrap();

    let (before, summary) = {
        let resolver = open_resolver(dir.path());
        identify(&resolver, "george@hillvalley.edu", "919191");
        identify(&resolver, "biffsucks@hillvalley.edu", "717171");
        identify(&resolver, "biff@hillvalley.edu", "717171");
        identify(&resolver, "george@hillvalley.edu", "717171");
        let summary = resolver.consolidate(Some("biff@hillvalley.edu"), None).unwrap();
        (resolver.store().all().unwrap(), summary)
    };
    assert_eq!(summary.primary_contact_id, ContactId::FIRST);
    assert_eq!(
        summary.secondary_contact_ids,
        vec![ContactId::new(2), ContactId::new(3)]
    );

    let resolver = open_resolver(dir.path());
    assert_eq!(resolver.store().all().unwrap(), before);
    assert!(resolver.audit().unwrap().is_empty());
    assert_eq!(
        resolver.consolidate(None, Some("919191")).unwrap(),
        summary
    );
}

/// Replaying the same log on every restart gives the same contents.
#[test]
fn test_wal_replay_idempotency() {
    let dir = tempdir().unwrap();
    {
        let resolver = open_resolver(dir.path());
        identify(&resolver, "unique@x.com", "424242");
    }

    for _ in 0..2 {
        let store = open_store(dir.path(), config()).unwrap();
        let matches = store.find_by_email("unique@x.com").unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, ContactId::FIRST);
    }
}
