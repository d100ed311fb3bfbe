//! In-memory clause store.
//!
//! The store is a plain value: the engine keeps it behind an `Arc` and
//! mutates a private copy (`Arc::make_mut`) on the write path, publishing
//! the new snapshot once a batch is complete. Readers therefore never see a
//! half-applied batch.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::certainty::Certainty;
use crate::clause::{ChangeKind, Clause, ClauseDraft, ClauseId, ClauseKind, ClauseStatus, StatusChange};
use crate::conflict::ConflictId;
use crate::error::{KyroError, KyroResult, ValidationError};
use crate::substitution::Substitution;
use crate::term::{Atom, Signature};
use crate::unify::unify_atoms;

/// Result of an assertion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AssertOutcome {
    /// A new clause was stored.
    Inserted(ClauseId),
    /// A structurally identical active clause existed and its certainty was
    /// raised.
    Reinforced {
        /// The existing clause.
        id: ClauseId,
        /// Certainty before.
        from: Certainty,
        /// Certainty after.
        to: Certainty,
    },
    /// A structurally identical active clause existed; nothing changed.
    Unchanged(ClauseId),
}

impl AssertOutcome {
    /// Id of the stored clause.
    #[must_use]
    pub const fn id(&self) -> ClauseId {
        match self {
            Self::Inserted(id) | Self::Unchanged(id) => *id,
            Self::Reinforced { id, .. } => *id,
        }
    }

    /// True if the assert created a new clause.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Result of a retraction. Retracting twice, or retracting an id that was
/// never issued, is a no-op rather than an error.
#[derive(Debug, Clone, PartialEq)]
pub enum RetractOutcome {
    /// The clause was active and is now retracted.
    Retracted(StatusChange),
    /// The clause was retracted earlier.
    AlreadyRetracted,
    /// No clause has this id.
    Unknown,
}

impl RetractOutcome {
    /// True if this call changed the status.
    #[must_use]
    pub const fn is_retracted(&self) -> bool {
        matches!(self, Self::Retracted(_))
    }
}

/// Clause counts by kind and status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Active facts.
    pub active_facts: usize,
    /// Active rules.
    pub active_rules: usize,
    /// Active default rules.
    pub active_defaults: usize,
    /// Retracted clauses of any kind.
    pub retracted: usize,
}

impl StoreStats {
    /// All clauses, active or not.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.active_facts + self.active_rules + self.active_defaults + self.retracted
    }
}

/// Indexed storage of facts, rules and default rules.
///
/// Clause ids are dense: clause `n` lives at position `n - 1`. Clauses are
/// never removed; retraction only flips their status and appends history.
#[derive(Debug, Clone, Default)]
pub struct ClauseStore {
    clauses: Vec<Clause>,
    by_signature: HashMap<Signature, Vec<ClauseId>>,
    /// Active clauses only, keyed by logical content.
    by_structure: HashMap<ClauseKind, ClauseId>,
    history: HashMap<ClauseId, Vec<StatusChange>>,
}

impl ClauseStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from exported clauses and their history.
    ///
    /// # Errors
    ///
    /// Returns an internal error if clause ids are not dense and ordered, or
    /// if a clause fails validation.
    pub fn restore(clauses: Vec<Clause>, history: Vec<StatusChange>) -> KyroResult<Self> {
        let mut store = Self::new();
        for clause in clauses {
            let expected = store.next_id();
            if clause.id != expected {
                return Err(KyroError::internal(format!(
                    "snapshot clause ids out of order: expected {expected}, found {}",
                    clause.id
                )));
            }
            clause.kind.validate()?;
            store.index(&clause);
            if clause.is_active() {
                store.by_structure.insert(clause.kind.clone(), clause.id);
            }
            store.clauses.push(clause);
        }
        for change in history {
            if store.get(change.clause_id).is_none() {
                return Err(KyroError::internal(format!(
                    "history references unknown clause {}",
                    change.clause_id
                )));
            }
            store.history.entry(change.clause_id).or_default().push(change);
        }
        Ok(store)
    }

    /// The id the next inserted clause will receive.
    #[must_use]
    pub fn next_id(&self) -> ClauseId {
        ClauseId::from_raw(self.clauses.len() as u64 + 1)
    }

    /// Number of clauses, retracted ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// True if nothing was ever asserted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Stores a clause, or returns the id of a structurally identical active
    /// one.
    ///
    /// A duplicate arriving from a different provenance raises the stored
    /// certainty to the maximum of the two; certainty is never lowered.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the clause is malformed.
    pub fn assert_at(&mut self, draft: ClauseDraft, at: DateTime<Utc>) -> Result<AssertOutcome, ValidationError> {
        draft.kind.validate()?;

        if let Some(&id) = self.by_structure.get(&draft.kind) {
            return Ok(self.reinforce(id, &draft, at));
        }

        let id = self.next_id();
        let clause = Clause {
            id,
            kind: draft.kind,
            provenance: draft.provenance,
            certainty: draft.certainty,
            status: ClauseStatus::Active,
            asserted_at: at,
        };
        self.index(&clause);
        self.by_structure.insert(clause.kind.clone(), id);
        self.history.entry(id).or_default().push(StatusChange {
            clause_id: id,
            at,
            status: ClauseStatus::Active,
            kind: ChangeKind::Asserted {
                certainty: clause.certainty,
            },
        });
        debug!(clause = %clause, "clause asserted");
        self.clauses.push(clause);
        Ok(AssertOutcome::Inserted(id))
    }

    fn reinforce(&mut self, id: ClauseId, draft: &ClauseDraft, at: DateTime<Utc>) -> AssertOutcome {
        let Some(existing) = self.slot_mut(id) else {
            return AssertOutcome::Unchanged(id);
        };
        if existing.provenance == draft.provenance || draft.certainty.value() <= existing.certainty.value() {
            return AssertOutcome::Unchanged(id);
        }

        let from = existing.certainty;
        let to = from.max(draft.certainty);
        existing.certainty = to;
        self.history.entry(id).or_default().push(StatusChange {
            clause_id: id,
            at,
            status: ClauseStatus::Active,
            kind: ChangeKind::Reinforced {
                from,
                to,
                provenance: draft.provenance.clone(),
            },
        });
        debug!(%id, %from, %to, "clause reinforced");
        AssertOutcome::Reinforced { id, from, to }
    }

    /// Flips a clause to `Retracted` and appends a history entry.
    ///
    /// Only the engine calls this, so that every retraction is followed by
    /// the matching justification-graph update.
    pub(crate) fn retract_at(
        &mut self,
        id: ClauseId,
        reason: &str,
        conflict_id: Option<ConflictId>,
        at: DateTime<Utc>,
    ) -> RetractOutcome {
        let Some(clause) = self.slot_mut(id) else {
            return RetractOutcome::Unknown;
        };
        if !clause.is_active() {
            return RetractOutcome::AlreadyRetracted;
        }
        clause.status = ClauseStatus::Retracted;
        let kind = clause.kind.clone();

        if self.by_structure.get(&kind) == Some(&id) {
            self.by_structure.remove(&kind);
        }
        let change = StatusChange {
            clause_id: id,
            at,
            status: ClauseStatus::Retracted,
            kind: ChangeKind::Retracted {
                reason: reason.to_string(),
                conflict_id,
            },
        };
        self.history.entry(id).or_default().push(change.clone());
        debug!(%id, reason, "clause retracted");
        RetractOutcome::Retracted(change)
    }

    /// Looks up a clause by id, whatever its status.
    #[must_use]
    pub fn get(&self, id: ClauseId) -> Option<&Clause> {
        let idx = usize::try_from(id.raw()).ok()?.checked_sub(1)?;
        self.clauses.get(idx)
    }

    fn slot_mut(&mut self, id: ClauseId) -> Option<&mut Clause> {
        let idx = usize::try_from(id.raw()).ok()?.checked_sub(1)?;
        self.clauses.get_mut(idx)
    }

    /// True if `id` names an active clause.
    #[must_use]
    pub fn is_active(&self, id: ClauseId) -> bool {
        self.get(id).is_some_and(Clause::is_active)
    }

    /// Active clauses in the given partition, in insertion order.
    pub fn lookup_by_functor<'a>(&'a self, signature: &Signature) -> impl Iterator<Item = &'a Clause> + 'a {
        self.by_signature
            .get(signature)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(move |id| self.get(*id))
            .filter(|c| c.is_active())
    }

    /// Active facts unifying with `pattern`, with the unifier of each.
    #[must_use]
    pub fn facts_matching(&self, pattern: &Atom) -> Vec<(Clause, Substitution)> {
        self.lookup_by_functor(&pattern.signature())
            .filter_map(|clause| match &clause.kind {
                ClauseKind::Fact { atom } => unify_atoms(pattern, atom, &Substitution::new())
                    .map(|s| (clause.clone(), s)),
                _ => None,
            })
            .collect()
    }

    /// All clauses (active and retracted) in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Clause> {
        self.clauses.iter()
    }

    /// Active ground facts of every partition, in id order.
    pub fn active_facts(&self) -> impl Iterator<Item = (&Clause, &Atom)> {
        self.clauses.iter().filter(|c| c.is_active()).filter_map(|c| match &c.kind {
            ClauseKind::Fact { atom } => Some((c, atom)),
            _ => None,
        })
    }

    /// Append-only status history of a clause.
    #[must_use]
    pub fn history(&self, id: ClauseId) -> &[StatusChange] {
        self.history.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every history entry, ordered by clause id then by time.
    #[must_use]
    pub fn full_history(&self) -> Vec<StatusChange> {
        self.clauses
            .iter()
            .flat_map(|c| self.history(c.id).iter().cloned())
            .collect()
    }

    /// Clause counts by kind and status.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        for clause in &self.clauses {
            if !clause.is_active() {
                stats.retracted += 1;
                continue;
            }
            match clause.kind {
                ClauseKind::Fact { .. } => stats.active_facts += 1,
                ClauseKind::Rule { .. } => stats.active_rules += 1,
                ClauseKind::Default { .. } => stats.active_defaults += 1,
            }
        }
        stats
    }

    /// Stable digest of the logical store contents.
    ///
    /// Timestamps are excluded, so a store rebuilt from the write-ahead log
    /// hashes the same as the store that wrote it.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a clause cannot be serialized.
    pub fn fingerprint(&self) -> KyroResult<String> {
        let mut hasher = blake3::Hasher::new();
        for clause in &self.clauses {
            let record = (clause.id, &clause.kind, &clause.provenance, clause.certainty, clause.status);
            let bytes = serde_json::to_vec(&record)
                .map_err(|e| KyroError::internal(format!("fingerprint serialization failed: {e}")))?;
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(&bytes);
        }
        Ok(hasher.finalize().to_hex().to_string())
    }

    fn index(&mut self, clause: &Clause) {
        self.by_signature
            .entry(clause.kind.signature())
            .or_default()
            .push(clause.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::Term;

    fn fact(f: &str, c: &str) -> ClauseDraft {
        ClauseDraft::fact(Atom::new(f, [Term::constant(c)]).unwrap())
    }

    fn sig(f: &str) -> Signature {
        Atom::new(f, [Term::var("X")]).unwrap().signature()
    }

    #[test]
    fn test_assert_assigns_sequential_ids() {
        let mut store = ClauseStore::new();
        let a = store.assert_at(fact("Bird", "tweety"), Utc::now()).unwrap();
        let b = store.assert_at(fact("Bird", "opus"), Utc::now()).unwrap();
        assert_eq!(a, AssertOutcome::Inserted(ClauseId::from_raw(1)));
        assert_eq!(b.id(), ClauseId::from_raw(2));
        assert_eq!(store.next_id(), ClauseId::from_raw(3));
    }

    #[test]
    fn test_assert_is_idempotent() {
        let mut store = ClauseStore::new();
        let first = store.assert_at(fact("Bird", "tweety"), Utc::now()).unwrap();
        let second = store.assert_at(fact("Bird", "tweety"), Utc::now()).unwrap();
        assert_eq!(first.id(), second.id());
        assert!(matches!(second, AssertOutcome::Unchanged(_)));
        assert_eq!(store.lookup_by_functor(&sig("Bird")).count(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_duplicate_from_other_source_raises_certainty() {
        let mut store = ClauseStore::new();
        let low = fact("Bird", "tweety").with_provenance("a").with_certainty(0.4).unwrap();
        let high = fact("Bird", "tweety").with_provenance("b").with_certainty(0.7).unwrap();
        let lower = fact("Bird", "tweety").with_provenance("c").with_certainty(0.1).unwrap();

        let id = store.assert_at(low, Utc::now()).unwrap().id();
        let outcome = store.assert_at(high, Utc::now()).unwrap();
        assert!(matches!(outcome, AssertOutcome::Reinforced { .. }));
        assert_eq!(store.get(id).unwrap().certainty.value(), 0.7);

        store.assert_at(lower, Utc::now()).unwrap();
        assert_eq!(store.get(id).unwrap().certainty.value(), 0.7);
        assert_eq!(store.history(id).len(), 2);
    }

    #[test]
    fn test_retract_is_status_flip() {
        let mut store = ClauseStore::new();
        let id = store.assert_at(fact("Bird", "tweety"), Utc::now()).unwrap().id();

        let outcome = store.retract_at(id, "test", None, Utc::now());
        assert!(outcome.is_retracted());
        assert!(!store.is_active(id));
        assert!(store.get(id).is_some());
        assert_eq!(store.lookup_by_functor(&sig("Bird")).count(), 0);
        assert_eq!(store.history(id).len(), 2);

        assert_eq!(store.retract_at(id, "again", None, Utc::now()), RetractOutcome::AlreadyRetracted);
        assert_eq!(
            store.retract_at(ClauseId::from_raw(99), "nope", None, Utc::now()),
            RetractOutcome::Unknown
        );
        assert_eq!(
            store.retract_at(ClauseId::from_raw(0), "nope", None, Utc::now()),
            RetractOutcome::Unknown
        );
    }

    #[test]
    fn test_reassert_after_retract_creates_new_clause() {
        let mut store = ClauseStore::new();
        let id = store.assert_at(fact("Bird", "tweety"), Utc::now()).unwrap().id();
        store.retract_at(id, "test", None, Utc::now());
        let again = store.assert_at(fact("Bird", "tweety"), Utc::now()).unwrap();
        assert!(again.is_new());
        assert_ne!(again.id(), id);
    }

    #[test]
    fn test_lookup_preserves_insertion_order_and_polarity() {
        let mut store = ClauseStore::new();
        store.assert_at(fact("Bird", "b"), Utc::now()).unwrap();
        store.assert_at(fact("Bird", "a"), Utc::now()).unwrap();
        let neg = ClauseDraft::fact(Atom::new("Bird", [Term::constant("c")]).unwrap().negate());
        store.assert_at(neg, Utc::now()).unwrap();

        let names: Vec<_> = store
            .lookup_by_functor(&sig("Bird"))
            .map(|c| c.kind.to_string())
            .collect();
        assert_eq!(names, vec!["Bird(b)", "Bird(a)"]);
    }

    #[test]
    fn test_facts_matching() {
        let mut store = ClauseStore::new();
        store.assert_at(fact("Bird", "tweety"), Utc::now()).unwrap();
        store.assert_at(fact("Bird", "opus"), Utc::now()).unwrap();
        let pattern = Atom::new("Bird", [Term::var("X")]).unwrap();

        let matches = store.facts_matching(&pattern);
        assert_eq!(matches.len(), 2);
        let x = crate::term::Variable::new("X");
        assert_eq!(matches[0].1.resolve(&x), Some(Term::constant("tweety")));
    }

    #[test]
    fn test_fingerprint_ignores_timestamps() {
        let mut a = ClauseStore::new();
        let mut b = ClauseStore::new();
        a.assert_at(fact("Bird", "tweety"), Utc::now()).unwrap();
        b.assert_at(fact("Bird", "tweety"), DateTime::<Utc>::UNIX_EPOCH).unwrap();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

        b.assert_at(fact("Bird", "opus"), Utc::now()).unwrap();
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn test_restore_rebuilds_indexes() {
        let mut store = ClauseStore::new();
        let id = store.assert_at(fact("Bird", "tweety"), Utc::now()).unwrap().id();
        store.assert_at(fact("Bird", "opus"), Utc::now()).unwrap();
        store.retract_at(id, "test", None, Utc::now());

        let restored = ClauseStore::restore(store.iter().cloned().collect(), store.full_history()).unwrap();
        assert_eq!(restored.fingerprint().unwrap(), store.fingerprint().unwrap());
        assert_eq!(restored.lookup_by_functor(&sig("Bird")).count(), 1);
        assert_eq!(restored.history(id).len(), 2);
        assert_eq!(restored.stats(), store.stats());
    }
}
