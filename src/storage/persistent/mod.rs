//! Durable storage for the clause store.
//!
//! A knowledge base directory holds an exclusive lock file and one
//! write-ahead log. The log is the only durable state: the clause store is
//! rebuilt by replaying it, and the justification graph is rebuilt lazily
//! by queries afterwards.
//!
//! ```text
//! <dir>/
//!   .lock          exclusive flock / LockFileEx
//!   clauses.wal    [MAGIC][VERSION][entry][entry]...
//! ```

mod codec;
mod file_lock;
mod wal;

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

pub use file_lock::FileLock;
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};

use crate::error::{KyroError, KyroResult};
use crate::storage::ClauseStore;

/// File name of the log inside a knowledge base directory.
pub const WAL_FILE: &str = "clauses.wal";

/// Configuration for persistent storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistentConfig {
    /// fsync after every entry (slower but survives power loss).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self { sync_on_write: true }
    }
}

impl PersistentConfig {
    /// Sets `sync_on_write`.
    #[must_use]
    pub fn with_sync_on_write(mut self, enabled: bool) -> Self {
        self.sync_on_write = enabled;
        self
    }
}

fn io_error(context: &'static str) -> impl Fn(std::io::Error) -> KyroError {
    move |e| KyroError::storage(format!("{context}: {e}"))
}

/// The durable side of a knowledge base: the directory lock and the log.
#[derive(Debug)]
pub struct Journal {
    wal: WriteAheadLog,
    _lock: FileLock,
}

impl Journal {
    /// Locks `dir` (creating it if needed), replays its log and returns the
    /// journal with the rebuilt clause store.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the directory is locked by another
    /// process, the log cannot be read, or replay does not reproduce the
    /// logged ids.
    pub fn open(dir: &Path, config: &PersistentConfig) -> KyroResult<(Self, ClauseStore)> {
        fs::create_dir_all(dir).map_err(io_error("create knowledge base directory"))?;
        let lock = FileLock::acquire(dir).map_err(io_error("lock knowledge base directory"))?;
        let (wal, entries) =
            WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write).map_err(io_error("open WAL"))?;
        let store = replay(&entries)?;
        info!(
            path = %dir.display(),
            entries = entries.len(),
            clauses = store.len(),
            "WAL replayed"
        );
        Ok((Self { wal, _lock: lock }, store))
    }

    /// Appends one entry.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub fn append(&mut self, kind: WalEntryKind, at: DateTime<Utc>) -> KyroResult<u64> {
        self.wal.append(kind, at).map_err(io_error("append to WAL"))
    }

    /// Sequence number of the last entry written.
    #[must_use]
    pub const fn current_sequence(&self) -> u64 {
        self.wal.current_sequence()
    }
}

/// Rebuilds a clause store from log entries, checking that every entry
/// reproduces the ids it recorded.
///
/// # Errors
///
/// Returns a storage error on divergence and a validation error if a logged
/// clause no longer validates.
pub fn replay(entries: &[WalEntry]) -> KyroResult<ClauseStore> {
    let mut store = ClauseStore::new();
    for entry in entries {
        match &entry.kind {
            WalEntryKind::Assert { clauses, ids } => {
                if clauses.len() != ids.len() {
                    return Err(KyroError::storage(format!(
                        "WAL entry {}: {} clauses but {} ids",
                        entry.sequence,
                        clauses.len(),
                        ids.len()
                    )));
                }
                for (draft, expected) in clauses.iter().zip(ids) {
                    let got = store.assert_at(draft.clone(), entry.timestamp)?.id();
                    if got != *expected {
                        return Err(KyroError::storage(format!(
                            "replay diverged at entry {}: expected {expected}, got {got}",
                            entry.sequence
                        )));
                    }
                }
            }
            WalEntryKind::Retract {
                ids,
                reason,
                conflict_id,
            } => {
                for id in ids {
                    let outcome = store.retract_at(*id, reason, *conflict_id, entry.timestamp);
                    if !outcome.is_retracted() {
                        return Err(KyroError::storage(format!(
                            "replay diverged at entry {}: {id} could not be retracted",
                            entry.sequence
                        )));
                    }
                }
            }
        }
    }
    Ok(store)
}
