//! Write batches.
//!
//! A batch is validated and applied to a private copy of the clause store,
//! logged, and then published in one swap, so readers see all of it or none
//! of it. The auditor runs once per batch.

use serde::{Deserialize, Serialize};

use crate::clause::{ClauseDraft, ClauseId};
use crate::conflict::Conflict;
use crate::error::ValidationError;
use crate::term::Atom;

/// Attaches caller metadata to a draft.
pub(crate) fn tagged(draft: ClauseDraft, provenance: Option<&str>, certainty: f32) -> Result<ClauseDraft, ValidationError> {
    let draft = draft.with_certainty(certainty)?;
    Ok(match provenance {
        Some(source) => draft.with_provenance(source),
        None => draft,
    })
}

/// Clauses collected for one write batch.
///
/// # Examples
///
/// ```
/// use kyrolog::{Atom, EngineConfig, KnowledgeBase, Term};
///
/// let kb = KnowledgeBase::new(EngineConfig::default()).unwrap();
/// let bird = |x: Term| Atom::new("Bird", [x]).unwrap();
/// let flies = |x: Term| Atom::new("Flies", [x]).unwrap();
///
/// let outcome = kb
///     .batch(|w| {
///         w.fact(bird(Term::constant("tweety")), None, 1.0)?;
///         w.default_rule(vec![bird(Term::var("X"))], vec![flies(Term::var("X"))], flies(Term::var("X")), Some("folk"), 0.9)?;
///         Ok(())
///     })
///     .unwrap();
/// assert_eq!(outcome.ids.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    drafts: Vec<ClauseDraft>,
}

impl WriteBatch {
    /// An empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a prepared draft.
    pub fn assert(&mut self, draft: ClauseDraft) -> &mut Self {
        self.drafts.push(draft);
        self
    }

    /// Adds a ground fact.
    ///
    /// # Errors
    ///
    /// Returns `CertaintyOutOfRange` for a certainty outside [0, 1].
    pub fn fact(&mut self, atom: Atom, provenance: Option<&str>, certainty: f32) -> Result<&mut Self, ValidationError> {
        let draft = tagged(ClauseDraft::fact(atom), provenance, certainty)?;
        Ok(self.assert(draft))
    }

    /// Adds `body ⟹ head`.
    ///
    /// # Errors
    ///
    /// Returns `CertaintyOutOfRange` for a certainty outside [0, 1].
    pub fn rule(
        &mut self,
        body: Vec<Atom>,
        head: Atom,
        provenance: Option<&str>,
        certainty: f32,
    ) -> Result<&mut Self, ValidationError> {
        let draft = tagged(ClauseDraft::rule(body, head), provenance, certainty)?;
        Ok(self.assert(draft))
    }

    /// Adds `prerequisites : justifications ⇝ consequent`.
    ///
    /// # Errors
    ///
    /// Returns `CertaintyOutOfRange` for a certainty outside [0, 1].
    pub fn default_rule(
        &mut self,
        prerequisites: Vec<Atom>,
        justifications: Vec<Atom>,
        consequent: Atom,
        provenance: Option<&str>,
        certainty: f32,
    ) -> Result<&mut Self, ValidationError> {
        let draft = tagged(
            ClauseDraft::default_rule(prerequisites, justifications, consequent),
            provenance,
            certainty,
        )?;
        Ok(self.assert(draft))
    }

    /// Number of drafts collected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    /// True if nothing was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }

    pub(crate) fn into_drafts(self) -> Vec<ClauseDraft> {
        self.drafts
    }
}

/// Result of a write batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// One id per submitted clause, in submission order. Structurally
    /// identical clauses share an id.
    pub ids: Vec<ClauseId>,
    /// Conflicts found by the audit that followed the batch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Conflict>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::Term;

    #[test]
    fn test_batch_collects_tagged_drafts() {
        let mut batch = WriteBatch::new();
        let bird = Atom::new("Bird", [Term::constant("tweety")]).unwrap();
        batch.fact(bird.clone(), Some("survey"), 0.7).unwrap();
        batch.assert(ClauseDraft::fact(bird));
        assert_eq!(batch.len(), 2);

        let drafts = batch.into_drafts();
        assert_eq!(drafts[0].provenance.as_ref().map(|p| p.as_str()), Some("survey"));
        assert!((drafts[0].certainty.value() - 0.7).abs() < f32::EPSILON);
        assert!(drafts[1].provenance.is_none());
    }

    #[test]
    fn test_bad_certainty_is_rejected() {
        let mut batch = WriteBatch::new();
        let bird = Atom::new("Bird", [Term::constant("tweety")]).unwrap();
        assert!(matches!(
            batch.fact(bird, None, 1.5),
            Err(ValidationError::CertaintyOutOfRange { .. })
        ));
        assert!(batch.is_empty());
    }
}
