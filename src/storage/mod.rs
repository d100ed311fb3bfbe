//! Clause storage.
//!
//! `ClauseStore` is the in-memory, copy-on-write store the engine reasons
//! over. `KnowledgeSnapshot` is its plain-data export. With the
//! `persistent` feature, `persistent` adds a write-ahead log that rebuilds
//! the store on open.

mod memory;
mod snapshot;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::{AssertOutcome, ClauseStore, RetractOutcome, StoreStats};
pub use snapshot::KnowledgeSnapshot;
