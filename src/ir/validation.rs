//! IR validation.
//!
//! Builders already validate their inputs, but deserialized payloads are
//! checked again before anything reaches the store.

use crate::clause::ClauseDraft;
use crate::error::ValidationError;
use crate::ir::operations::{AssertPayload, KyroIR, Operation, QueryPayload};
use crate::term::Atom;

/// Upper bound on clauses in one write batch.
pub const MAX_BATCH_CLAUSES: usize = 4096;

/// Upper bound on goals in one conjunctive query.
pub const MAX_QUERY_GOALS: usize = 64;

/// Upper bound on the number of symbols in a single atom.
pub const MAX_ATOM_SIZE: usize = 4096;

fn validate_atom(field: &'static str, atom: &Atom) -> Result<(), ValidationError> {
    if atom.term().size() > MAX_ATOM_SIZE {
        return Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max_length: MAX_ATOM_SIZE,
        });
    }
    atom.validate()
}

fn validate_len<T>(field: &'static str, items: &[T], max_length: usize) -> Result<(), ValidationError> {
    if items.len() > max_length {
        return Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max_length,
        });
    }
    Ok(())
}

impl AssertPayload {
    /// Validates this payload.
    ///
    /// # Errors
    ///
    /// Returns the first structural fault found in any clause.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_clauses(&self.clauses)
    }
}

pub(crate) fn validate_clauses(clauses: &[ClauseDraft]) -> Result<(), ValidationError> {
    validate_len("clauses", clauses, MAX_BATCH_CLAUSES)?;
    for draft in clauses {
        for atom in draft.kind.atoms() {
            validate_atom("clauses", atom)?;
        }
        draft.kind.validate()?;
    }
    Ok(())
}

impl QueryPayload {
    /// Validates this payload.
    ///
    /// # Errors
    ///
    /// Returns `MissingField` for an empty conjunction and the first
    /// malformed goal otherwise.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_goals(&self.goals)
    }
}

pub(crate) fn validate_goals(goals: &[Atom]) -> Result<(), ValidationError> {
    if goals.is_empty() {
        return Err(ValidationError::MissingField {
            field: "goals".to_string(),
        });
    }
    validate_len("goals", goals, MAX_QUERY_GOALS)?;
    goals.iter().try_for_each(|goal| validate_atom("goals", goal))
}

impl Operation {
    /// Validates the operation payload.
    ///
    /// # Errors
    ///
    /// Returns the payload's validation error.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Assert(p) => p.validate(),
            Self::Query(p) => p.validate(),
            Self::Audit | Self::History(_) | Self::Explain(_) | Self::Materialize | Self::Stats => Ok(()),
        }
    }
}

impl KyroIR {
    /// Validates the envelope and its operation.
    ///
    /// # Errors
    ///
    /// Returns `MissingField` for an empty version, or the operation's
    /// validation error.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.version.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "version".to_string(),
            });
        }
        self.operation.validate()
    }
}
