//! Operation definitions and payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clause::{ClauseDraft, ClauseId};
use crate::term::Atom;
use crate::tms::BeliefId;

/// Transport wrapper for every operation.
///
/// Carries a protocol version, a request id for correlating logs and the
/// time the request was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KyroIR {
    /// Protocol version (e.g., "1.0").
    pub version: String,

    /// Unique identifier for this request.
    pub request_id: Uuid,

    /// When the request was created.
    pub timestamp: DateTime<Utc>,

    /// The operation to execute.
    pub operation: Operation,
}

impl KyroIR {
    /// Current protocol version.
    pub const CURRENT_VERSION: &'static str = "1.0";

    /// Wraps an operation.
    #[must_use]
    pub fn new(operation: Operation) -> Self {
        Self {
            version: Self::CURRENT_VERSION.to_string(),
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            operation,
        }
    }

    /// Sets a custom request ID (useful for correlation).
    #[must_use]
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }

    /// One write batch.
    #[must_use]
    pub fn assert(clauses: Vec<ClauseDraft>) -> Self {
        Self::new(Operation::Assert(AssertPayload { clauses }))
    }

    /// A conjunctive query with default fallback and no answer limit.
    #[must_use]
    pub fn query(goals: Vec<Atom>) -> Self {
        Self::new(Operation::Query(QueryPayload {
            goals,
            limit: None,
            classical_only: false,
        }))
    }
}

/// Every operation the core accepts from its caller.
///
/// Retraction is deliberately absent: clauses are only retracted by the
/// consistency auditor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "payload", rename_all = "snake_case")]
pub enum Operation {
    /// Assert facts, rules and defaults as one write batch.
    Assert(AssertPayload),

    /// Answer a conjunctive query.
    Query(QueryPayload),

    /// Run the consistency auditor.
    Audit,

    /// Status history of one clause.
    History(HistoryPayload),

    /// Justification tree of one belief.
    Explain(ExplainPayload),

    /// Forward-chain every active rule.
    Materialize,

    /// Knowledge base statistics.
    Stats,
}

impl Operation {
    /// Operation name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Assert(_) => "assert",
            Self::Query(_) => "query",
            Self::Audit => "audit",
            Self::History(_) => "history",
            Self::Explain(_) => "explain",
            Self::Materialize => "materialize",
            Self::Stats => "stats",
        }
    }

    /// True if the operation changes the clause store.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        matches!(self, Self::Assert(_) | Self::Audit)
    }
}

/// Payload for ASSERT operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertPayload {
    /// Clauses to apply as one atomic batch.
    pub clauses: Vec<ClauseDraft>,
}

/// Payload for QUERY operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPayload {
    /// Conjunction of goals; variables are shared across goals.
    pub goals: Vec<Atom>,

    /// Stop after this many answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Skip the default-rule fallback.
    #[serde(default)]
    pub classical_only: bool,
}

/// Payload for HISTORY operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPayload {
    /// Clause whose history is requested.
    pub clause_id: ClauseId,
}

/// Payload for EXPLAIN operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainPayload {
    /// Belief to explain.
    pub belief_id: BeliefId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::Term;

    fn bird(name: &str) -> Atom {
        Atom::new("Bird", [Term::constant(name)]).unwrap()
    }

    #[test]
    fn test_kyro_ir_creation() {
        let ir = KyroIR::assert(vec![ClauseDraft::fact(bird("tweety"))]);
        assert_eq!(ir.version, KyroIR::CURRENT_VERSION);
        assert!(matches!(ir.operation, Operation::Assert(ref p) if p.clauses.len() == 1));
    }

    #[test]
    fn test_operation_tagging() {
        let json = serde_json::to_value(Operation::Audit).unwrap();
        assert_eq!(json["op"], "audit");

        let ir = KyroIR::query(vec![bird("tweety")]);
        let json = serde_json::to_value(&ir.operation).unwrap();
        assert_eq!(json["op"], "query");
        assert_eq!(json["payload"]["classical_only"], false);
        assert!(json["payload"].get("limit").is_none());
    }

    #[test]
    fn test_query_payload_defaults() {
        let json = r#"{"op":"query","payload":{"goals":[]}}"#;
        let op: Operation = serde_json::from_str(json).unwrap();
        let Operation::Query(payload) = op else {
            panic!("expected query");
        };
        assert_eq!(payload.limit, None);
        assert!(!payload.classical_only);
    }

    #[test]
    fn test_write_classification() {
        assert!(Operation::Audit.is_write());
        assert!(KyroIR::assert(Vec::new()).operation.is_write());
        assert!(!Operation::Stats.is_write());
        assert!(!KyroIR::query(Vec::new()).operation.is_write());
    }
}
