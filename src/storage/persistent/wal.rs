//! Write-ahead log.
//!
//! Every write batch and every retraction set is appended as one entry
//! before the new clause store is published. On open, the log is replayed
//! in order; replay stops at the first entry that fails its checksum or
//! breaks the sequence, and the damaged tail is cut off so new entries are
//! never written behind garbage.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec-encoded WalEntry]
//! [ENTRY 2: codec-encoded WalEntry]
//! ...
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clause::{ClauseDraft, ClauseId};
use crate::conflict::ConflictId;

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Starts at 1 and increases by one per entry.
    pub sequence: u64,
    /// When the operation was applied; replay reuses it for clause history.
    pub timestamp: DateTime<Utc>,
    /// The operation and the ids it produced.
    pub kind: WalEntryKind,
}

/// A logged operation with the ids it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalEntryKind {
    /// One write batch; `ids[i]` is the id `clauses[i]` resolved to.
    Assert {
        /// The batch as submitted.
        clauses: Vec<ClauseDraft>,
        /// The id each draft resolved to.
        ids: Vec<ClauseId>,
    },

    /// Clauses retracted by the auditor.
    Retract {
        /// Clauses retracted.
        ids: Vec<ClauseId>,
        /// Why they were retracted.
        reason: String,
        /// Conflict that led to the retraction.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conflict_id: Option<ConflictId>,
    },
}

/// Append-only log file.
///
/// Not internally synchronized: the engine's writer lock serializes access.
#[derive(Debug)]
pub struct WriteAheadLog {
    path: PathBuf,
    writer: BufWriter<File>,
    sequence: u64,
    sync_on_write: bool,
}

impl WriteAheadLog {
    /// Opens or creates a log file and returns it with every valid entry.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened or does not start
    /// with a KyroLog header.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<(Self, Vec<WalEntry>)> {
        let existing_len = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let entries = if existing_len >= codec::HEADER_LEN {
            let (entries, valid_len) = Self::scan(path)?;
            if valid_len < existing_len {
                warn!(
                    path = %path.display(),
                    valid_len,
                    file_len = existing_len,
                    "truncating damaged WAL tail"
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(valid_len)?;
                if sync_on_write {
                    file.sync_all()?;
                }
            }
            entries
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            Vec::new()
        };

        let sequence = entries.last().map_or(0, |e| e.sequence);
        let file = OpenOptions::new().append(true).open(path)?;
        Ok((
            Self {
                path: path.to_path_buf(),
                writer: BufWriter::new(file),
                sequence,
                sync_on_write,
            },
            entries,
        ))
    }

    /// Reads entries up to the first damaged one. Returns them with the
    /// byte length of the valid prefix.
    fn scan(path: &Path) -> IoResult<(Vec<WalEntry>, u64)> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;

        let mut entries: Vec<WalEntry> = Vec::new();
        let mut valid_len = codec::HEADER_LEN;
        while valid_len < file_len {
            let expected = entries.last().map_or(1, |e| e.sequence + 1);
            match codec::decode::<WalEntry>(&mut reader) {
                Ok(entry) if entry.sequence == expected => {
                    entries.push(entry);
                    valid_len = reader.stream_position()?;
                }
                Ok(entry) => {
                    warn!(expected, found = entry.sequence, "WAL sequence gap; replay stops here");
                    break;
                }
                Err(e) => {
                    warn!(sequence = expected, error = %e, "WAL corruption detected; replay stops here");
                    break;
                }
            }
        }
        Ok((entries, valid_len))
    }

    /// Appends an entry and returns its sequence number.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the entry cannot be encoded or written.
    pub fn append(&mut self, kind: WalEntryKind, timestamp: DateTime<Utc>) -> IoResult<u64> {
        let entry = WalEntry {
            sequence: self.sequence + 1,
            timestamp,
            kind,
        };
        let encoded = codec::encode(&entry)?;
        self.writer.write_all(&encoded)?;
        self.writer.flush()?;
        if self.sync_on_write {
            self.writer.get_ref().sync_all()?;
        }
        self.sequence = entry.sequence;
        Ok(entry.sequence)
    }

    /// Sequence number of the last entry (0 for an empty log).
    #[must_use]
    pub const fn current_sequence(&self) -> u64 {
        self.sequence
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file metadata cannot be read.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }
}
