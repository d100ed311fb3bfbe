//! Consistency auditor.
//!
//! An audit runs three passes over the current snapshot:
//!
//! 1. default ties queued by queries since the last audit,
//! 2. default violations: a supported default belief whose justification
//!    has since become classically refutable,
//! 3. direct contradictions: an atom and its explicit negation both hold.
//!
//! Classical contradictions are resolved by retracting a greedy conflict
//! set. Starting from the proofs of both sides, the lowest-certainty
//! supporting clause (lowest id on ties) is excluded until one side no
//! longer has a proof; a second pass then puts back every excluded clause
//! the contradiction does not need. The result is minimal with respect to
//! single put-backs but not guaranteed globally minimal.
//!
//! The audit checks its `CancellationToken` between conflicts. Work done
//! before cancellation stays valid because retraction never reverses.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clause::ClauseId;
use crate::conflict::{Conflict, ConflictType};
use crate::engine::{KnowledgeBase, Writer};
use crate::error::{ExecutionError, KyroResult};
use crate::inference::{Context, DefaultReasoner};
use crate::storage::ClauseStore;
use crate::substitution::Substitution;
use crate::term::Atom;
use crate::tms::{Belief, BeliefState, DerivationKind, Support};

/// Cooperative cancellation flag for long audits.
///
/// # Examples
///
/// ```
/// use kyrolog::CancellationToken;
///
/// let token = CancellationToken::new();
/// let handle = token.clone();
/// handle.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. The audit stops before its next conflict.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once `cancel` has been called on this token or a clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Everything one audit found, in detection order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Every conflict found, in detection order.
    pub conflicts: Vec<Conflict>,
    /// The audit stopped early on request.
    #[serde(default)]
    pub cancelled: bool,
}

impl AuditReport {
    /// True if nothing was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Conflicts the auditor could not resolve.
    pub fn unresolved(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(|c| !c.is_resolved())
    }

    /// Strict view of the report.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the audit stopped early, otherwise
    /// `ConflictUnresolved` for the first unresolved conflict.
    pub fn ensure_resolved(&self) -> Result<(), ExecutionError> {
        if self.cancelled {
            return Err(ExecutionError::Cancelled {
                during: "audit".to_string(),
            });
        }
        match self.unresolved().find_map(Conflict::to_error) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Resolution of one classical contradiction.
enum ConflictSet {
    Retract(Vec<ClauseId>),
    /// The contradiction disappeared before anything was retracted.
    Gone,
    Unresolvable(String),
}

pub(crate) struct Auditor<'a> {
    kb: &'a KnowledgeBase,
    writer: &'a mut Writer,
    token: &'a CancellationToken,
    report: AuditReport,
}

impl<'a> Auditor<'a> {
    pub(crate) fn new(kb: &'a KnowledgeBase, writer: &'a mut Writer, token: &'a CancellationToken) -> Self {
        Self {
            kb,
            writer,
            token,
            report: AuditReport::default(),
        }
    }

    pub(crate) fn run(mut self) -> KyroResult<AuditReport> {
        self.ties()?;
        if !self.stop() {
            self.default_violations()?;
        }
        if !self.stop() {
            self.contradictions()?;
        }

        let unresolved = self.report.unresolved().count();
        info!(
            conflicts = self.report.conflicts.len(),
            unresolved,
            cancelled = self.report.cancelled,
            "audit complete"
        );
        Ok(self.report)
    }

    fn stop(&mut self) -> bool {
        if self.token.is_cancelled() {
            if !self.report.cancelled {
                debug!("audit cancelled");
            }
            self.report.cancelled = true;
        }
        self.report.cancelled
    }

    fn push(&mut self, conflict: Conflict) {
        if !conflict.is_resolved() {
            warn!(conflict = %conflict, reason = ?conflict.reason, "unresolved conflict");
        }
        self.report.conflicts.push(conflict);
    }

    /// Ties are never guessed: each one is reported unresolved.
    fn ties(&mut self) -> KyroResult<()> {
        let ctx = self.kb.context()?;
        let ties = ctx.with_tms(|tms| Ok(tms.drain_ties()))?;
        for tie in ties {
            let mut conflict = Conflict::new(ConflictType::DefaultTie {
                goal: tie.goal.clone(),
                rules: tie.rules.clone(),
            });
            for rule in &tie.rules {
                if let Some(clause) = ctx.store.get(*rule) {
                    conflict.note(format!("applicable: {clause}"));
                }
            }
            conflict.mark_unresolved(format!(
                "defaults of equal certainty disagree on {}",
                tie.goal
            ));
            self.push(conflict);
        }
        Ok(())
    }

    fn default_violations(&mut self) -> KyroResult<()> {
        let ctx = self.kb.context()?;
        let assumptions: Vec<Belief> =
            ctx.with_tms(|tms| Ok(tms.supported_assumptions().cloned().collect()))?;

        for belief in assumptions {
            if self.stop() {
                return Ok(());
            }
            let still_supported = ctx.with_tms(|tms| Ok(tms.get(belief.id).is_some_and(Belief::is_supported)))?;
            if !still_supported {
                continue;
            }
            let refuted = belief.justifications.iter().find_map(|s| match s {
                Support::Unrefuted(j) if ctx.provable(&j.negate(), false) => Some(j.clone()),
                _ => None,
            });
            let Some(justification) = refuted else {
                continue;
            };

            let mut conflict = Conflict::new(ConflictType::DefaultViolation {
                belief_id: belief.id,
                justification: justification.clone(),
            });
            conflict.note(format!("{belief} assumed {justification}"));
            conflict.note(format!("{} is now classically provable", justification.negate()));

            let orphaned = ctx.with_tms(|tms| tms.orphan(belief.id))?;
            conflict.note(format!("orphaned {} belief(s)", orphaned.len()));

            // Another default may still conclude the same atom.
            let rederived = DefaultReasoner::new(&ctx).derive(&belief.atom)?;
            let resupported = ctx.with_tms(|tms| {
                Ok(tms.get(belief.id).map(|b| b.state) == Some(BeliefState::Supported))
            })?;
            if resupported {
                conflict.note(format!("{} re-supported by another default", belief.id));
            } else {
                ctx.with_tms(|tms| tms.invalidate(belief.id))?;
                conflict.invalidated.push(belief.id);
                conflict.note(format!("invalidated {}", belief.id));
            }
            if let Some(goal) = rederived.cutoff {
                conflict.note(format!("re-derivation cut off at {goal}"));
            }
            debug!(conflict = %conflict, "default violation handled");
            self.push(conflict);
        }
        Ok(())
    }

    fn contradictions(&mut self) -> KyroResult<()> {
        let ctx = self.kb.context()?;
        let mut atoms: Vec<Atom> = Vec::new();
        let mut seen: HashSet<Atom> = HashSet::new();
        let mut add = |atom: &Atom| {
            let positive = if atom.is_negated() { atom.negate() } else { atom.clone() };
            if positive.is_ground() && seen.insert(positive.clone()) {
                atoms.push(positive);
            }
        };
        for (_, atom) in ctx.store.active_facts() {
            add(atom);
        }
        let believed: Vec<Atom> = ctx.with_tms(|tms| {
            Ok(tms
                .iter()
                .filter(|b| b.is_supported())
                .map(|b| b.atom.clone())
                .collect())
        })?;
        for atom in &believed {
            add(atom);
        }

        for positive in atoms {
            if self.stop() {
                return Ok(());
            }
            self.check_contradiction(&positive)?;
        }
        Ok(())
    }

    fn check_contradiction(&mut self, positive: &Atom) -> KyroResult<()> {
        let ctx = self.kb.context()?;
        let negative = positive.negate();
        let pos_classical = ctx.provable(positive, false);
        let neg_classical = ctx.provable(&negative, false);

        if pos_classical && neg_classical {
            return self.resolve_classical(&ctx, positive, &negative);
        }

        let default_belief = |atom: &Atom| {
            ctx.with_tms(|tms| {
                Ok(tms
                    .cached(atom, DerivationKind::Default)
                    .filter(|b| b.is_supported())
                    .map(|b| b.id))
            })
        };
        let pos_default = default_belief(positive)?;
        let neg_default = default_belief(&negative)?;

        let defeasible = match (pos_classical, neg_classical, pos_default, neg_default) {
            (true, _, _, Some(id)) => Some(id),
            (_, true, Some(id), _) => Some(id),
            (false, false, Some(_), Some(_)) => {
                let mut conflict = Conflict::new(ConflictType::DirectContradiction {
                    positive: positive.clone(),
                    negative,
                });
                conflict.mark_unresolved("both polarities rest on default assumptions");
                self.push(conflict);
                return Ok(());
            }
            _ => None,
        };
        let Some(id) = defeasible else {
            return Ok(());
        };

        let mut conflict = Conflict::new(ConflictType::DirectContradiction {
            positive: positive.clone(),
            negative,
        });
        conflict.note(format!("default belief {id} contradicts a classical proof"));
        let orphaned = ctx.with_tms(|tms| tms.invalidate(id))?;
        conflict.invalidated.push(id);
        conflict.note(format!("invalidated {id}, orphaned {} dependent(s)", orphaned.len()));
        self.push(conflict);
        Ok(())
    }

    fn resolve_classical(&mut self, ctx: &Context, positive: &Atom, negative: &Atom) -> KyroResult<()> {
        let mut conflict = Conflict::new(ConflictType::DirectContradiction {
            positive: positive.clone(),
            negative: negative.clone(),
        });
        conflict.note(format!("both {positive} and {negative} are provable"));

        match self.conflict_set(ctx, positive, negative, &mut conflict) {
            ConflictSet::Gone => return Ok(()),
            ConflictSet::Unresolvable(reason) => conflict.mark_unresolved(reason),
            ConflictSet::Retract(set) => {
                conflict.chosen = set.first().copied();
                let reason = format!("conflict set for {positive} / {negative}");
                let retraction = self.kb.retract_locked(&mut *self.writer, &set, &reason, Some(conflict.id))?;
                for id in &retraction.skipped {
                    conflict.note(ExecutionError::RetractionOfUnknownClause { id: *id }.to_string());
                }
                conflict.note(format!(
                    "retracted {} clause(s), orphaned {} belief(s)",
                    retraction.retracted.len(),
                    retraction.orphaned.len()
                ));
                conflict.retracted = retraction.retracted;
            }
        }
        self.push(conflict);
        Ok(())
    }

    fn conflict_set(&self, ctx: &Context, positive: &Atom, negative: &Atom, conflict: &mut Conflict) -> ConflictSet {
        let protect = self.kb.config().protect_axioms;
        let store = &ctx.store;
        let mut excluded: Vec<ClauseId> = Vec::new();

        loop {
            let exclude: HashSet<ClauseId> = excluded.iter().copied().collect();
            let Some(support) = contradiction_support(ctx, positive, negative, &exclude) else {
                break;
            };

            let order = retraction_order(store, &support, protect);
            let Some(clause) = order.first().and_then(|id| store.get(*id)) else {
                return ConflictSet::Unresolvable(if support.is_empty() {
                    "no retractable clause supports the contradiction".to_string()
                } else {
                    "every supporting clause is a protected axiom".to_string()
                });
            };
            conflict.note(format!("exclude {clause} (lowest certainty in support)"));
            excluded.push(clause.id);
        }

        if excluded.is_empty() {
            return ConflictSet::Gone;
        }

        // Put back anything the remaining exclusions already cover.
        let mut kept = excluded.clone();
        for id in excluded.iter().rev() {
            let without: HashSet<ClauseId> = kept.iter().copied().filter(|k| k != id).collect();
            if contradiction_support(ctx, positive, negative, &without).is_none() {
                kept.retain(|k| k != id);
                conflict.note(format!("put back {id} (not needed)"));
            }
        }
        ConflictSet::Retract(kept)
    }
}

/// Clauses used by one proof of each side while both still have a proof
/// with `exclude` removed. A side whose search is cut by the depth guard
/// counts as still provable, with no clauses of its own to offer.
fn contradiction_support(
    ctx: &Context,
    positive: &Atom,
    negative: &Atom,
    exclude: &HashSet<ClauseId>,
) -> Option<BTreeSet<ClauseId>> {
    let exclude = Arc::new(exclude.clone());
    let mut support = BTreeSet::new();
    for atom in [positive, negative] {
        let mut search = ctx
            .search(std::slice::from_ref(atom), Substitution::new())
            .excluding(Arc::clone(&exclude));
        match search.next_solution() {
            Some(solution) => support.extend(solution.clauses()),
            None if search.cutoff().is_some() => {}
            None => return None,
        }
    }
    Some(support)
}

/// Retractable clauses among `ids`, lowest certainty first, lowest id on
/// ties. Axioms are left out when `protect` is set.
fn retraction_order(store: &ClauseStore, ids: &BTreeSet<ClauseId>, protect: bool) -> Vec<ClauseId> {
    let mut clauses: Vec<_> = ids
        .iter()
        .filter_map(|id| store.get(*id))
        .filter(|clause| !(protect && clause.is_axiom()))
        .collect();
    clauses.sort_by(|a, b| a.certainty.total_cmp(&b.certainty).then(a.id.cmp(&b.id)));
    clauses.into_iter().map(|c| c.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::ClauseDraft;
    use crate::config::EngineConfig;
    use crate::term::Term;

    fn p() -> Atom {
        Atom::new("P", [Term::constant("a")]).unwrap()
    }

    fn kb() -> KnowledgeBase {
        KnowledgeBase::new(EngineConfig::default().with_audit_after_write(false)).unwrap()
    }

    fn fact(atom: Atom, certainty: f32) -> ClauseDraft {
        ClauseDraft::fact(atom)
            .with_provenance("test")
            .with_certainty(certainty)
            .unwrap()
    }

    #[test]
    fn test_token_is_shared_between_clones() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.clone().cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_report_strict_view() {
        let mut report = AuditReport::default();
        assert!(report.ensure_resolved().is_ok());

        let mut conflict = Conflict::new(ConflictType::DirectContradiction {
            positive: p(),
            negative: p().negate(),
        });
        conflict.mark_unresolved("axioms");
        report.conflicts.push(conflict);
        assert!(matches!(
            report.ensure_resolved(),
            Err(ExecutionError::ConflictUnresolved { .. })
        ));

        report.cancelled = true;
        assert!(matches!(report.ensure_resolved(), Err(ExecutionError::Cancelled { .. })));
    }

    #[test]
    fn test_lowest_certainty_then_lowest_id() {
        let kb = kb();
        let a = kb.assert(fact(Atom::new("Q", [Term::constant("a")]).unwrap(), 0.5)).unwrap();
        let b = kb.assert(fact(Atom::new("Q", [Term::constant("b")]).unwrap(), 0.3)).unwrap();
        let c = kb.assert(fact(Atom::new("Q", [Term::constant("c")]).unwrap(), 0.3)).unwrap();
        let store = kb.snapshot().unwrap();
        let ids: BTreeSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(retraction_order(&store, &ids, true), vec![b, c, a]);

        let axiom = kb.assert(ClauseDraft::fact(p())).unwrap();
        let store = kb.snapshot().unwrap();
        let ids: BTreeSet<_> = [a, axiom].into_iter().collect();
        assert_eq!(retraction_order(&store, &ids, true), vec![a]);
        assert_eq!(retraction_order(&store, &ids, false), vec![a, axiom]);
    }

    #[test]
    fn test_direct_contradiction_retracts_weaker_fact() {
        let kb = kb();
        let strong = kb.assert(fact(p(), 0.9)).unwrap();
        let weak = kb.assert(fact(p().negate(), 0.3)).unwrap();

        let report = kb.audit().unwrap();
        assert_eq!(report.conflicts.len(), 1);
        let conflict = &report.conflicts[0];
        assert!(conflict.is_resolved());
        assert_eq!(conflict.retracted, vec![weak]);
        assert_eq!(conflict.chosen, Some(weak));

        let store = kb.snapshot().unwrap();
        assert!(store.is_active(strong));
        assert!(!store.is_active(weak));
    }

    #[test]
    fn test_put_back_keeps_set_minimal() {
        // ¬P(a) is derived through R(a) (0.2) and S(a) (0.4); P(a) is a
        // fact at 0.5. Excluding R(a) alone breaks the negative side.
        let kb = kb();
        let r = Atom::new("R", [Term::constant("a")]).unwrap();
        let s = Atom::new("S", [Term::constant("a")]).unwrap();
        let x = Term::var("X");
        kb.assert(fact(p(), 0.5)).unwrap();
        let r_id = kb.assert(fact(r, 0.2)).unwrap();
        kb.assert(fact(s, 0.4)).unwrap();
        kb.assert(
            ClauseDraft::rule(
                vec![
                    Atom::new("R", [x.clone()]).unwrap(),
                    Atom::new("S", [x.clone()]).unwrap(),
                ],
                Atom::new("P", [x]).unwrap().negate(),
            )
            .with_provenance("test")
            .with_certainty(0.9)
            .unwrap(),
        )
        .unwrap();

        let report = kb.audit().unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].retracted, vec![r_id]);
    }

    #[test]
    fn test_protected_axioms_are_unresolved() {
        let kb = kb();
        kb.assert(ClauseDraft::fact(p())).unwrap();
        kb.assert(ClauseDraft::fact(p().negate())).unwrap();

        let report = kb.audit().unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert!(!report.conflicts[0].is_resolved());
        assert!(report.conflicts[0].retracted.is_empty());
        assert_eq!(kb.snapshot().unwrap().stats().retracted, 0);
    }

    #[test]
    fn test_cancelled_audit_does_nothing() {
        let kb = kb();
        kb.assert(fact(p(), 0.9)).unwrap();
        kb.assert(fact(p().negate(), 0.3)).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let report = kb.audit_with(&token).unwrap();
        assert!(report.cancelled);
        assert!(report.conflicts.is_empty());
        assert_eq!(kb.snapshot().unwrap().stats().retracted, 0);
    }
}
