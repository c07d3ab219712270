//! Write-ahead log for the persistent contact store.
//!
//! Every mutation is appended (and optionally fsynced) before it becomes visible
//! in memory. A merge is logged as a single [`WalRecord::Relink`] record, so on
//! replay it is either fully present or absent.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec-framed WalEntry]
//! [ENTRY 2: codec-framed WalEntry]
//! ...
//! ```
//!
//! Sequence numbers keep increasing across truncation: a truncated log starts
//! with a [`WalRecord::Checkpoint`] carrying the next sequence, so snapshot
//! coverage can be compared against any later log.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::contact::Contact;

use super::codec;

/// A single logged mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The mutation.
    pub record: WalRecord,
}

/// The mutation carried by a [`WalEntry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalRecord {
    /// A newly created contact, including its assigned id.
    Insert(Contact),
    /// Post-update images of every row rewritten by one atomic batch.
    Relink {
        /// Rows in their new state.
        rows: Vec<Contact>,
    },
    /// Marks the start of a truncated log; everything up to `up_to_sequence`
    /// lives in the snapshot.
    Checkpoint {
        /// Highest sequence captured by the snapshot.
        up_to_sequence: u64,
    },
}

struct WalWriter {
    file: File,
    sequence: u64,
    // Set when a failed append could not be rolled back; cleared by `truncate`.
    broken: bool,
}

/// Append-only log. Thread-safe via an internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_on_write: bool,
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("path", &self.path)
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

fn poisoned() -> IoError {
    IoError::new(ErrorKind::Other, "poisoned lock: wal.writer")
}

impl WriteAheadLog {
    /// Opens or creates the log at `path` and returns it with every intact entry.
    ///
    /// A record cut short at the end of the file (a crash mid-append) is dropped
    /// and the file is trimmed back to the last complete record. A checksum
    /// failure anywhere is reported as `ErrorKind::InvalidData`.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<(Self, Vec<WalEntry>)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let file_len = file.metadata()?.len();
        let (entries, valid_len) = if file_len < codec::HEADER_LEN {
            file.set_len(0)?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            (Vec::new(), codec::HEADER_LEN)
        } else {
            Self::scan(path)?
        };

        if valid_len < file_len && file_len >= codec::HEADER_LEN {
            warn!(
                path = %path.display(),
                dropped_bytes = file_len - valid_len,
                "WAL ends in a torn record; trimming"
            );
            file.set_len(valid_len)?;
            if sync_on_write {
                file.sync_all()?;
            }
        }

        let sequence = entries.last().map_or(0, |e| e.sequence);
        let append = OpenOptions::new().append(true).open(path)?;

        let wal = Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                file: append,
                sequence,
                broken: false,
            }),
            sync_on_write,
        };
        Ok((wal, entries))
    }

    fn scan(path: &Path) -> IoResult<(Vec<WalEntry>, u64)> {
        let mut reader = BufReader::new(File::open(path)?);
        codec::read_header(&mut reader)?;

        let mut entries = Vec::new();
        let mut valid_len = reader.stream_position()?;
        loop {
            match codec::decode::<WalEntry>(&mut reader) {
                Ok(entry) => {
                    if let Some(prev) = entries.last().map(|e: &WalEntry| e.sequence) {
                        if entry.sequence <= prev {
                            return Err(IoError::new(
                                ErrorKind::InvalidData,
                                format!(
                                    "WAL corrupted: sequence {} follows {prev}",
                                    entry.sequence
                                ),
                            ));
                        }
                    }
                    entries.push(entry);
                    valid_len = reader.stream_position()?;
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    return Err(IoError::new(
                        ErrorKind::InvalidData,
                        format!(
                            "WAL corrupted after sequence {}: {e}",
                            entries.last().map_or(0, |last: &WalEntry| last.sequence)
                        ),
                    ))
                }
            }
        }
        Ok((entries, valid_len))
    }

    fn lock(&self) -> IoResult<MutexGuard<'_, WalWriter>> {
        self.writer.lock().map_err(|_| poisoned())
    }

    /// Appends a record, returning its sequence number.
    ///
    /// On failure the file is cut back to its length before the call, so a
    /// later append never lands behind a partial record.
    pub fn append(&self, record: WalRecord) -> IoResult<u64> {
        let sync = self.sync_on_write;
        self.append_with(record, |file, bytes| {
            file.write_all(bytes)?;
            if sync {
                file.sync_all()?;
            }
            Ok(())
        })
    }

    fn append_with<F>(&self, record: WalRecord, write: F) -> IoResult<u64>
    where
        F: FnOnce(&mut File, &[u8]) -> IoResult<()>,
    {
        let mut writer = self.lock()?;
        if writer.broken {
            return Err(IoError::new(
                ErrorKind::Other,
                "WAL holds an unrecoverable partial record; reopen the store",
            ));
        }
        let sequence = writer.sequence + 1;
        let encoded = codec::encode(&WalEntry {
            sequence,
            timestamp: Utc::now(),
            record,
        })?;

        let prev_len = writer.file.metadata()?.len();
        if let Err(err) = write(&mut writer.file, &encoded) {
            if let Err(rollback) = writer.file.set_len(prev_len) {
                warn!(
                    path = %self.path.display(),
                    error = %rollback,
                    "failed to roll back partial WAL append"
                );
                writer.broken = true;
            }
            return Err(err);
        }
        writer.sequence = sequence;
        Ok(sequence)
    }

    /// Highest sequence written so far.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.lock()?.sequence)
    }

    /// Raises the next sequence above `floor`, so entries appended after a
    /// snapshot are never mistaken for ones it already covers.
    pub fn advance_to(&self, floor: u64) -> IoResult<()> {
        let mut writer = self.lock()?;
        writer.sequence = writer.sequence.max(floor);
        Ok(())
    }

    /// WAL file size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Empties the log after a snapshot has captured everything up to
    /// `up_to_sequence`.
    ///
    /// Only call this once the snapshot is durable.
    pub fn truncate(&self, up_to_sequence: u64) -> IoResult<()> {
        let mut writer = self.lock()?;
        let sequence = writer.sequence.max(up_to_sequence) + 1;
        let checkpoint = codec::encode(&WalEntry {
            sequence,
            timestamp: Utc::now(),
            record: WalRecord::Checkpoint { up_to_sequence },
        })?;

        let mut fresh = OpenOptions::new().write(true).truncate(true).open(&self.path)?;
        codec::write_header(&mut fresh)?;
        fresh.write_all(&checkpoint)?;
        fresh.sync_all()?;
        drop(fresh);

        writer.file = OpenOptions::new().append(true).open(&self.path)?;
        writer.sequence = sequence;
        writer.broken = false;
        Ok(())
    }
}
