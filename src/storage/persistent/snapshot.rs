//! Point-in-time snapshot files.
//!
//! Compaction writes the full contact index to `snapshot.tmp`, fsyncs it and
//! renames it over `snapshot.ctid`. The rename is the commit point: a crash
//! before it leaves the previous snapshot (plus the untruncated WAL) in charge.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::index::ContactSnapshot;

use super::codec;

const SNAPSHOT_FILE: &str = "snapshot.ctid";
const SNAPSHOT_TMP: &str = "snapshot.tmp";

/// Metadata framed ahead of the snapshot body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Highest WAL sequence reflected in the snapshot.
    pub sequence: u64,
    /// Number of contacts in the body.
    pub contact_count: usize,
    /// When the snapshot was written.
    pub created_at: DateTime<Utc>,
}

/// A snapshot loaded from disk.
#[derive(Debug, Clone)]
pub struct LoadedSnapshot {
    /// Header.
    pub header: SnapshotHeader,
    /// Index contents.
    pub data: ContactSnapshot,
}

/// Path of the committed snapshot in `dir`.
#[must_use]
pub fn snapshot_path(dir: &Path) -> PathBuf {
    dir.join(SNAPSHOT_FILE)
}

/// Loads the committed snapshot, if any.
pub fn load(dir: &Path) -> IoResult<Option<LoadedSnapshot>> {
    let path = snapshot_path(dir);
    if !path.exists() {
        return Ok(None);
    }

    let mut reader = BufReader::new(File::open(&path)?);
    codec::read_header(&mut reader)?;
    let header: SnapshotHeader = codec::decode(&mut reader)?;
    let data: ContactSnapshot = codec::decode(&mut reader)?;
    Ok(Some(LoadedSnapshot { header, data }))
}

/// Writes and commits a snapshot covering the WAL up to `sequence`.
pub fn write(dir: &Path, sequence: u64, data: &ContactSnapshot) -> IoResult<PathBuf> {
    let tmp = dir.join(SNAPSHOT_TMP);
    let header = SnapshotHeader {
        sequence,
        contact_count: data.contacts.len(),
        created_at: Utc::now(),
    };

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp)?;
    let mut writer = BufWriter::new(file);
    codec::write_header(&mut writer)?;
    writer.write_all(&codec::encode(&header)?)?;
    writer.write_all(&codec::encode(data)?)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    drop(writer);

    let path = snapshot_path(dir);
    fs::rename(&tmp, &path)?;
    sync_dir(dir)?;
    Ok(path)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> IoResult<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> IoResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::{ContactId, NewContact};
    use tempfile::tempdir;

    #[test]
    fn test_missing_snapshot_is_none() {
        let dir = tempdir().unwrap();
        assert!(load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempdir().unwrap();
        let contact = NewContact::primary(Some("a@x.com".into()), Some("111".into()), Utc::now())
            .into_contact(ContactId::FIRST);
        let data = ContactSnapshot {
            next_id: Some(ContactId::new(2)),
            contacts: vec![contact.clone()],
        };

        write(dir.path(), 7, &data).unwrap();
        assert!(!dir.path().join(SNAPSHOT_TMP).exists());

        let loaded = load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.header.sequence, 7);
        assert_eq!(loaded.header.contact_count, 1);
        assert_eq!(loaded.data.contacts, vec![contact]);
    }
}
