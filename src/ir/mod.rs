//! Intermediate Representation (IR) for KyroLog operations.
//!
//! The IR is the plain-data boundary of the core: every operation a caller
//! can submit, in a serializable form suitable for any transport, request
//! logging and the runtime's worker queues.

mod operations;
mod serialization;
mod validation;

pub use operations::{AssertPayload, ExplainPayload, HistoryPayload, KyroIR, Operation, QueryPayload};
pub use serialization::{from_json, to_json_pretty};
pub use validation::{MAX_ATOM_SIZE, MAX_BATCH_CLAUSES, MAX_QUERY_GOALS};

pub(crate) use validation::{validate_clauses, validate_goals};
