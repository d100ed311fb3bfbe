//! Conflict records produced by the consistency auditor.
//!
//! Conflicts in KyroLog are explicit objects, not hidden errors. Every
//! contradiction the auditor finds becomes a `Conflict` carrying what was
//! retracted (if anything), which clause was chosen, and the full reasoning
//! trace so the decision can be explained later.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clause::ClauseId;
use crate::error::ExecutionError;
use crate::term::Atom;
use crate::tms::BeliefId;

/// Unique identifier for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(Uuid);

impl ConflictId {
    /// Creates a new random conflict ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of inconsistency found.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConflictType {
    /// Both an atom and its explicit negation are derivable.
    DirectContradiction {
        /// The positive atom.
        positive: Atom,
        /// Its explicit negation.
        negative: Atom,
    },

    /// A default-derived belief whose justification has since become
    /// classically refuted.
    DefaultViolation {
        /// The violated default belief.
        belief_id: BeliefId,
        /// The justification now refuted.
        justification: Atom,
    },

    /// Applicable defaults disagree on a goal with equal certainty.
    DefaultTie {
        /// The contested goal.
        goal: Atom,
        /// The tied default rules.
        rules: Vec<ClauseId>,
    },
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectContradiction { positive, negative } => {
                write!(f, "direct_contradiction({positive}, {negative})")
            }
            Self::DefaultViolation {
                belief_id,
                justification,
            } => write!(f, "default_violation({belief_id}, {justification})"),
            Self::DefaultTie { goal, .. } => write!(f, "default_tie({goal})"),
        }
    }
}

/// The status of a conflict after the audit pass that found it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    /// The auditor retracted a conflict set or invalidated the violating
    /// belief.
    Resolved,

    /// The auditor could not confidently pick anything to retract.
    Unresolved,
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved => write!(f, "resolved"),
            Self::Unresolved => write!(f, "unresolved"),
        }
    }
}

/// A detected inconsistency and what the auditor did about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Unique id of this conflict.
    pub id: ConflictId,
    /// What kind of inconsistency was found.
    pub conflict_type: ConflictType,
    /// Whether the auditor resolved it.
    pub status: ConflictStatus,
    /// When the auditor found it.
    pub detected_at: DateTime<Utc>,

    /// Clauses retracted to resolve the conflict (the greedy conflict set).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retracted: Vec<ClauseId>,

    /// The first clause picked by the lowest-certainty rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen: Option<ClauseId>,

    /// Beliefs invalidated directly by the resolution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invalidated: Vec<BeliefId>,

    /// Step-by-step reasoning trace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<String>,

    /// Why the conflict is unresolved, if it is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Conflict {
    pub(crate) fn new(conflict_type: ConflictType) -> Self {
        Self {
            id: ConflictId::new(),
            conflict_type,
            status: ConflictStatus::Resolved,
            detected_at: Utc::now(),
            retracted: Vec::new(),
            chosen: None,
            invalidated: Vec::new(),
            trace: Vec::new(),
            reason: None,
        }
    }

    pub(crate) fn note(&mut self, step: impl Into<String>) {
        self.trace.push(step.into());
    }

    pub(crate) fn mark_unresolved(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.note(format!("unresolved: {reason}"));
        self.status = ConflictStatus::Unresolved;
        self.reason = Some(reason);
    }

    /// True if the conflict was resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.status == ConflictStatus::Resolved
    }

    /// The strict form of an unresolved conflict.
    #[must_use]
    pub fn to_error(&self) -> Option<ExecutionError> {
        match self.status {
            ConflictStatus::Resolved => None,
            ConflictStatus::Unresolved => Some(ExecutionError::ConflictUnresolved {
                conflict_id: self.id,
                reason: self
                    .reason
                    .clone()
                    .unwrap_or_else(|| self.conflict_type.to_string()),
            }),
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.id, self.status, self.conflict_type)
    }
}
