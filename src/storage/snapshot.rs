//! Plain-data export of a clause store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clause::{Clause, StatusChange};
use crate::error::{KyroError, KyroResult};
use crate::storage::ClauseStore;

/// Every clause, retracted ones included, with its full history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSnapshot {
    /// Layout version; see `FORMAT_VERSION`.
    pub format_version: u32,
    /// When the snapshot was taken.
    pub exported_at: DateTime<Utc>,
    /// `ClauseStore::fingerprint` at export time; checked on restore.
    pub fingerprint: String,
    /// Every clause in id order, retracted ones included.
    pub clauses: Vec<Clause>,
    /// Every status change in order.
    pub history: Vec<StatusChange>,
}

impl KnowledgeSnapshot {
    /// Layout version written by this build.
    pub const FORMAT_VERSION: u32 = 1;

    /// Captures the store.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store cannot be fingerprinted.
    pub fn capture(store: &ClauseStore) -> KyroResult<Self> {
        Ok(Self {
            format_version: Self::FORMAT_VERSION,
            exported_at: Utc::now(),
            fingerprint: store.fingerprint()?,
            clauses: store.iter().cloned().collect(),
            history: store.full_history(),
        })
    }

    /// Rebuilds the store this snapshot was captured from.
    ///
    /// # Errors
    ///
    /// Returns a storage error for an unknown format version or a
    /// fingerprint mismatch, and the store's error if the clauses do not
    /// restore.
    pub fn restore(&self) -> KyroResult<ClauseStore> {
        if self.format_version != Self::FORMAT_VERSION {
            return Err(KyroError::storage(format!(
                "unsupported snapshot format {} (expected {})",
                self.format_version,
                Self::FORMAT_VERSION
            )));
        }
        let store = ClauseStore::restore(self.clauses.clone(), self.history.clone())?;
        let fingerprint = store.fingerprint()?;
        if fingerprint != self.fingerprint {
            return Err(KyroError::storage(format!(
                "snapshot fingerprint mismatch: recorded {}, rebuilt {fingerprint}",
                self.fingerprint
            )));
        }
        Ok(store)
    }

    /// # Errors
    ///
    /// Returns an internal error if serialization fails.
    pub fn to_json(&self) -> KyroResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| KyroError::internal(format!("serialize snapshot: {e}")))
    }

    /// # Errors
    ///
    /// Returns a storage error if the JSON is not a snapshot.
    pub fn from_json(json: &str) -> KyroResult<Self> {
        serde_json::from_str(json).map_err(|e| KyroError::storage(format!("deserialize snapshot: {e}")))
    }
}
