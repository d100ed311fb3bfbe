//! Justification-based truth maintenance.
//!
//! Every derived belief records the clauses and beliefs it was derived
//! from. When a clause is retracted or a belief invalidated, everything that
//! transitively depends on it is marked `Orphaned` in one deterministic
//! cascade. Orphans are not re-derived here: the query path re-proves them
//! lazily the next time they are asked for, so the cost of a retraction is
//! bounded by the beliefs it touches.

mod belief;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use belief::{Belief, BeliefDraft, BeliefId, BeliefState, DerivationKind, Support};

use crate::clause::ClauseId;
use crate::error::{KyroError, KyroResult};
use crate::storage::ClauseStore;
use crate::term::Atom;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Node {
    Clause(ClauseId),
    Belief(BeliefId),
}

/// Applicable defaults that disagree on a goal with equal certainty.
/// Queued by the query path and drained by the auditor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DefaultTie {
    /// The goal the defaults disagree on.
    pub goal: Atom,
    /// The tied default rules.
    pub rules: Vec<ClauseId>,
}

/// Belief counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeliefStats {
    /// Beliefs whose justifications all hold.
    pub supported: usize,
    /// Beliefs waiting for re-justification.
    pub orphaned: usize,
    /// Beliefs that can no longer be derived.
    pub invalidated: usize,
    /// Supported beliefs derived through a default rule.
    pub default_derived: usize,
}

/// Belief cache plus justification graph.
#[derive(Debug, Default)]
pub struct TruthMaintenance {
    beliefs: Vec<Belief>,
    /// Ground atoms to their live (supported or orphaned) belief.
    cache: HashMap<(Atom, DerivationKind), BeliefId>,
    /// Reverse edges: premise -> beliefs that use it.
    dependents: HashMap<Node, Vec<BeliefId>>,
    /// Retractions already propagated. Readers may hold a store snapshot
    /// older than this.
    retracted: HashSet<ClauseId>,
    pending_ties: Vec<DefaultTie>,
}

impl TruthMaintenance {
    /// An empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a belief by id, whatever its state.
    #[must_use]
    pub fn get(&self, id: BeliefId) -> Option<&Belief> {
        let idx = usize::try_from(id.raw()).ok()?.checked_sub(1)?;
        self.beliefs.get(idx)
    }

    fn slot_mut(&mut self, id: BeliefId) -> Option<&mut Belief> {
        let idx = usize::try_from(id.raw()).ok()?.checked_sub(1)?;
        self.beliefs.get_mut(idx)
    }

    fn require(&self, id: BeliefId) -> KyroResult<&Belief> {
        self.get(id).ok_or_else(|| {
            KyroError::graph_corruption(format!("edge to nonexistent belief {id}"), self.dump())
        })
    }

    /// Number of beliefs ever recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.beliefs.len()
    }

    /// True if nothing was recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.beliefs.is_empty()
    }

    /// Every belief in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &Belief> {
        self.beliefs.iter()
    }

    /// The belief cached for `atom` or a variant of it, if any.
    #[must_use]
    pub fn cached(&self, atom: &Atom, kind: DerivationKind) -> Option<&Belief> {
        self.cache
            .get(&(atom.canonical(), kind))
            .and_then(|id| self.get(*id))
    }

    /// Records a derivation.
    ///
    /// For an atom that already has a supported belief of the same kind
    /// (up to variable renaming), the existing belief is returned unchanged. An orphaned belief is
    /// re-supported by the new justification set. A derivation whose
    /// premises are no longer all active is recorded as orphaned.
    ///
    /// # Errors
    ///
    /// Returns `GraphCorruption` if a justification references a clause or
    /// belief that does not exist, or if re-supporting would close a cycle.
    pub fn record(&mut self, draft: BeliefDraft, store: &ClauseStore) -> KyroResult<BeliefId> {
        let mut sound = true;
        for support in &draft.justifications {
            match support {
                Support::Clause(id) => {
                    let Some(clause) = store.get(*id) else {
                        return Err(KyroError::graph_corruption(
                            format!("edge to nonexistent clause {id}"),
                            self.dump(),
                        ));
                    };
                    if !clause.is_active() || self.retracted.contains(id) {
                        sound = false;
                    }
                }
                Support::Belief(id) => {
                    if !self.require(*id)?.is_supported() {
                        sound = false;
                    }
                }
                Support::Unrefuted(_) => {}
            }
        }

        let key = (draft.atom.canonical(), draft.kind);
        if let Some(existing) = self.cache.get(&key).copied() {
            match self.require(existing)?.state {
                BeliefState::Supported => return Ok(existing),
                BeliefState::Orphaned if sound => {
                    self.resupport(existing, draft)?;
                    return Ok(existing);
                }
                BeliefState::Orphaned => return Ok(existing),
                BeliefState::Invalidated => {}
            }
        }

        let id = BeliefId::from_raw(self.beliefs.len() as u64 + 1);
        let state = if sound {
            BeliefState::Supported
        } else {
            BeliefState::Orphaned
        };
        let belief = Belief {
            id,
            atom: draft.atom,
            kind: draft.kind,
            justifications: draft.justifications,
            state,
            certainty: draft.certainty,
            derived_at: Utc::now(),
        };
        debug!(belief = %belief, "belief recorded");
        self.beliefs.push(belief);
        self.link(id);
        self.cache.insert(key, id);
        Ok(id)
    }

    fn resupport(&mut self, id: BeliefId, draft: BeliefDraft) -> KyroResult<()> {
        for support in &draft.justifications {
            if let Support::Belief(premise) = support {
                if self.reaches(*premise, id) {
                    return Err(KyroError::graph_corruption(
                        format!("re-supporting {id} through {premise} would close a cycle"),
                        self.dump(),
                    ));
                }
            }
        }
        self.unlink(id);
        if let Some(belief) = self.slot_mut(id) {
            belief.justifications = draft.justifications;
            belief.certainty = draft.certainty;
            belief.state = BeliefState::Supported;
            belief.derived_at = Utc::now();
        }
        self.link(id);
        debug!(%id, "belief re-supported");
        Ok(())
    }

    /// True if following premise edges from `from` arrives at `target`.
    fn reaches(&self, from: BeliefId, target: BeliefId) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(belief) = self.get(current) {
                stack.extend(belief.justifications.iter().filter_map(|s| match s {
                    Support::Belief(p) => Some(*p),
                    _ => None,
                }));
            }
        }
        false
    }

    fn premises(&self, id: BeliefId) -> Vec<Node> {
        self.get(id)
            .map(|b| {
                b.justifications
                    .iter()
                    .filter_map(|s| match s {
                        Support::Clause(c) => Some(Node::Clause(*c)),
                        Support::Belief(p) => Some(Node::Belief(*p)),
                        Support::Unrefuted(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn link(&mut self, id: BeliefId) {
        for node in self.premises(id) {
            let entry = self.dependents.entry(node).or_default();
            if !entry.contains(&id) {
                entry.push(id);
            }
        }
    }

    fn unlink(&mut self, id: BeliefId) {
        for node in self.premises(id) {
            if let Some(entry) = self.dependents.get_mut(&node) {
                entry.retain(|d| *d != id);
            }
        }
    }

    /// Propagates a clause retraction. Returns the beliefs that went from
    /// `Supported` to `Orphaned`, premises before dependents.
    ///
    /// # Errors
    ///
    /// Returns `GraphCorruption` if the affected subgraph contains a cycle.
    pub fn on_clause_retracted(&mut self, clause: ClauseId) -> KyroResult<Vec<BeliefId>> {
        self.retracted.insert(clause);
        let seeds = self
            .dependents
            .get(&Node::Clause(clause))
            .cloned()
            .unwrap_or_default();
        self.cascade(seeds)
    }

    /// Marks a supported belief orphaned, together with everything that
    /// depends on it.
    ///
    /// # Errors
    ///
    /// Returns `GraphCorruption` on a cycle or unknown id.
    pub fn orphan(&mut self, id: BeliefId) -> KyroResult<Vec<BeliefId>> {
        self.require(id)?;
        self.cascade(vec![id])
    }

    /// Terminally invalidates a belief and orphans its supported dependents.
    ///
    /// # Errors
    ///
    /// Returns `GraphCorruption` on a cycle or unknown id.
    pub fn invalidate(&mut self, id: BeliefId) -> KyroResult<Vec<BeliefId>> {
        let key = {
            let belief = self.require(id)?;
            (belief.atom.canonical(), belief.kind)
        };
        if let Some(belief) = self.slot_mut(id) {
            belief.state = BeliefState::Invalidated;
        }
        if self.cache.get(&key) == Some(&id) {
            self.cache.remove(&key);
        }
        debug!(%id, "belief invalidated");
        let seeds = self
            .dependents
            .get(&Node::Belief(id))
            .cloned()
            .unwrap_or_default();
        self.cascade(seeds)
    }

    fn cascade(&mut self, seeds: Vec<BeliefId>) -> KyroResult<Vec<BeliefId>> {
        let mut affected = BTreeSet::new();
        let mut stack = seeds;
        while let Some(id) = stack.pop() {
            if affected.contains(&id) || !self.require(id)?.is_supported() {
                continue;
            }
            affected.insert(id);
            if let Some(next) = self.dependents.get(&Node::Belief(id)) {
                stack.extend(next.iter().copied());
            }
        }

        let order = self.topological(&affected)?;
        for id in &order {
            if let Some(belief) = self.slot_mut(*id) {
                belief.state = BeliefState::Orphaned;
            }
        }
        if !order.is_empty() {
            debug!(count = order.len(), "beliefs orphaned");
        }
        Ok(order)
    }

    /// Kahn's algorithm over the affected subgraph, smallest id first.
    fn topological(&self, affected: &BTreeSet<BeliefId>) -> KyroResult<Vec<BeliefId>> {
        let mut indegree: HashMap<BeliefId, usize> = affected.iter().map(|id| (*id, 0)).collect();
        for id in affected {
            for node in self.premises(*id) {
                if let Node::Belief(p) = node {
                    if affected.contains(&p) {
                        *indegree.entry(*id).or_default() += 1;
                    }
                }
            }
        }

        let mut ready: BTreeSet<BeliefId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(affected.len());
        while let Some(id) = ready.pop_first() {
            order.push(id);
            for dep in self.dependents.get(&Node::Belief(id)).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(dep) {
                    *d = d.saturating_sub(1);
                    if *d == 0 {
                        ready.insert(*dep);
                    }
                }
            }
        }

        if order.len() != affected.len() {
            return Err(KyroError::graph_corruption(
                "cycle in justification graph during retraction cascade",
                self.dump(),
            ));
        }
        Ok(order)
    }

    /// Orphaned beliefs in id order.
    #[must_use]
    pub fn orphans(&self) -> Vec<BeliefId> {
        self.beliefs
            .iter()
            .filter(|b| b.state == BeliefState::Orphaned)
            .map(|b| b.id)
            .collect()
    }

    /// Supported beliefs that depend on at least one default assumption.
    pub fn supported_assumptions(&self) -> impl Iterator<Item = &Belief> {
        self.beliefs
            .iter()
            .filter(|b| b.is_supported() && b.kind == DerivationKind::Default)
    }

    pub(crate) fn queue_tie(&mut self, tie: DefaultTie) {
        if !self.pending_ties.contains(&tie) {
            debug!(goal = %tie.goal, "default tie queued");
            self.pending_ties.push(tie);
        }
    }

    pub(crate) fn drain_ties(&mut self) -> Vec<DefaultTie> {
        std::mem::take(&mut self.pending_ties)
    }

    /// Belief counts by state.
    #[must_use]
    pub fn stats(&self) -> BeliefStats {
        let mut stats = BeliefStats::default();
        for belief in &self.beliefs {
            match belief.state {
                BeliefState::Supported => stats.supported += 1,
                BeliefState::Orphaned => stats.orphaned += 1,
                BeliefState::Invalidated => stats.invalidated += 1,
            }
            if belief.kind == DerivationKind::Default {
                stats.default_derived += 1;
            }
        }
        stats
    }

    /// Verifies that every edge points at an existing node and that the
    /// graph is acyclic.
    ///
    /// # Errors
    ///
    /// Returns `GraphCorruption` with a full dump of the graph.
    pub fn check_integrity(&self, store: &ClauseStore) -> KyroResult<()> {
        for belief in &self.beliefs {
            for support in &belief.justifications {
                let dangling = match support {
                    Support::Clause(c) => store.get(*c).is_none(),
                    Support::Belief(b) => self.get(*b).is_none(),
                    Support::Unrefuted(_) => false,
                };
                if dangling {
                    return Err(KyroError::graph_corruption(
                        format!("{} has an edge to nonexistent {support}", belief.id),
                        self.dump(),
                    ));
                }
            }
        }

        // 0 = unvisited, 1 = on stack, 2 = done
        let mut color = vec![0u8; self.beliefs.len()];
        for start in 0..self.beliefs.len() {
            if color[start] != 0 {
                continue;
            }
            let mut stack = vec![(start, 0usize)];
            color[start] = 1;
            while let Some((idx, edge)) = stack.pop() {
                let premises: Vec<usize> = self.beliefs[idx]
                    .justifications
                    .iter()
                    .filter_map(|s| match s {
                        Support::Belief(b) => usize::try_from(b.raw()).ok()?.checked_sub(1),
                        _ => None,
                    })
                    .collect();
                if let Some(&next) = premises.get(edge) {
                    stack.push((idx, edge + 1));
                    match color[next] {
                        0 => {
                            color[next] = 1;
                            stack.push((next, 0));
                        }
                        1 => {
                            return Err(KyroError::graph_corruption(
                                format!("cycle through {}", self.beliefs[next].id),
                                self.dump(),
                            ));
                        }
                        _ => {}
                    }
                } else {
                    color[idx] = 2;
                }
            }
        }
        Ok(())
    }

    /// Human-readable dump of the whole graph, one belief per line.
    #[must_use]
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for belief in &self.beliefs {
            let premises: Vec<String> = belief.justifications.iter().map(ToString::to_string).collect();
            let _ = writeln!(out, "{belief} <- {}", premises.join(", "));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certainty::Certainty;
    use crate::clause::ClauseDraft;
    use crate::term::Term;

    fn atom(f: &str, c: &str) -> Atom {
        Atom::new(f, [Term::constant(c)]).unwrap()
    }

    fn draft(a: Atom, justifications: Vec<Support>) -> BeliefDraft {
        BeliefDraft {
            atom: a,
            kind: DerivationKind::Classical,
            justifications,
            certainty: Certainty::one(),
        }
    }

    fn store_with_fact() -> (ClauseStore, ClauseId) {
        let mut store = ClauseStore::new();
        let id = store
            .assert_at(ClauseDraft::fact(atom("P", "a")), Utc::now())
            .unwrap()
            .id();
        (store, id)
    }

    /// Builds `P(a)` as a fact and a chain of `n` beliefs `Q1(a) <- P(a)`,
    /// `Q2(a) <- Q1(a)`, ...
    fn chain(tms: &mut TruthMaintenance, store: &ClauseStore, fact: ClauseId, n: usize) -> Vec<BeliefId> {
        let mut ids = Vec::new();
        let mut prev = Support::Clause(fact);
        for i in 1..=n {
            let id = tms.record(draft(atom(&format!("Q{i}"), "a"), vec![prev]), store).unwrap();
            ids.push(id);
            prev = Support::Belief(id);
        }
        ids
    }

    #[test]
    fn test_record_reuses_supported_belief() {
        let (store, fact) = store_with_fact();
        let mut tms = TruthMaintenance::new();
        let a = tms.record(draft(atom("Q", "a"), vec![Support::Clause(fact)]), &store).unwrap();
        let b = tms.record(draft(atom("Q", "a"), vec![Support::Clause(fact)]), &store).unwrap();
        assert_eq!(a, b);
        assert_eq!(tms.len(), 1);
        assert!(tms.cached(&atom("Q", "a"), DerivationKind::Classical).is_some());
        assert!(tms.cached(&atom("Q", "a"), DerivationKind::Default).is_none());
    }

    #[test]
    fn test_open_conclusions_are_cached_up_to_renaming() {
        let (store, fact) = store_with_fact();
        let mut tms = TruthMaintenance::new();
        let open = |y: &str| Atom::new("R", [Term::constant("a"), Term::var(y)]).unwrap();
        let a = tms.record(draft(open("Y"), vec![Support::Clause(fact)]), &store).unwrap();
        for name in ["W", "Y", "Y1", "Y2"] {
            let b = tms.record(draft(open(name), vec![Support::Clause(fact)]), &store).unwrap();
            assert_eq!(a, b);
        }
        assert_eq!(tms.len(), 1);
        assert!(tms.cached(&open("Z"), DerivationKind::Classical).is_some());
    }

    #[test]
    fn test_record_rejects_dangling_edges() {
        let (store, _) = store_with_fact();
        let mut tms = TruthMaintenance::new();
        let err = tms
            .record(draft(atom("Q", "a"), vec![Support::Clause(ClauseId::from_raw(9))]), &store)
            .unwrap_err();
        assert!(matches!(err, KyroError::GraphCorruption { .. }));

        let err = tms
            .record(draft(atom("Q", "a"), vec![Support::Belief(BeliefId::from_raw(9))]), &store)
            .unwrap_err();
        assert!(matches!(err, KyroError::GraphCorruption { .. }));
    }

    #[test]
    fn test_retraction_cascades_exactly_the_chain() {
        let (mut store, fact) = store_with_fact();
        let other = store
            .assert_at(ClauseDraft::fact(atom("R", "a")), Utc::now())
            .unwrap()
            .id();
        let mut tms = TruthMaintenance::new();
        let ids = chain(&mut tms, &store, fact, 4);
        let unrelated = tms.record(draft(atom("S", "a"), vec![Support::Clause(other)]), &store).unwrap();

        store.retract_at(fact, "test", None, Utc::now());
        let orphaned = tms.on_clause_retracted(fact).unwrap();

        assert_eq!(orphaned, ids);
        assert!(ids.iter().all(|id| tms.get(*id).unwrap().state == BeliefState::Orphaned));
        assert!(tms.get(unrelated).unwrap().is_supported());
        assert_eq!(tms.orphans(), ids);
    }

    #[test]
    fn test_orphan_is_resupported_by_alternative() {
        let (mut store, fact) = store_with_fact();
        let alt = store
            .assert_at(ClauseDraft::fact(atom("R", "a")), Utc::now())
            .unwrap()
            .id();
        let mut tms = TruthMaintenance::new();
        let q = tms.record(draft(atom("Q", "a"), vec![Support::Clause(fact)]), &store).unwrap();

        store.retract_at(fact, "test", None, Utc::now());
        tms.on_clause_retracted(fact).unwrap();

        let again = tms.record(draft(atom("Q", "a"), vec![Support::Clause(alt)]), &store).unwrap();
        assert_eq!(again, q);
        let belief = tms.get(q).unwrap();
        assert!(belief.is_supported());
        assert_eq!(belief.justifications, vec![Support::Clause(alt)]);

        // The stale edge is gone: retracting the old fact again touches nothing.
        assert!(tms.on_clause_retracted(fact).unwrap().is_empty());
    }

    #[test]
    fn test_derivation_from_retracted_premise_is_orphaned() {
        let (store, fact) = store_with_fact();
        let mut tms = TruthMaintenance::new();
        // A reader with a stale snapshot still sees the clause as active.
        tms.on_clause_retracted(fact).unwrap();
        let q = tms.record(draft(atom("Q", "a"), vec![Support::Clause(fact)]), &store).unwrap();
        assert_eq!(tms.get(q).unwrap().state, BeliefState::Orphaned);
    }

    #[test]
    fn test_invalidate_drops_cache_and_orphans_dependents() {
        let (store, fact) = store_with_fact();
        let mut tms = TruthMaintenance::new();
        let ids = chain(&mut tms, &store, fact, 3);

        let orphaned = tms.invalidate(ids[0]).unwrap();
        assert_eq!(orphaned, ids[1..].to_vec());
        assert_eq!(tms.get(ids[0]).unwrap().state, BeliefState::Invalidated);
        assert!(tms.cached(&atom("Q1", "a"), DerivationKind::Classical).is_none());

        // A fresh derivation creates a new belief instance.
        let fresh = tms.record(draft(atom("Q1", "a"), vec![Support::Clause(fact)]), &store).unwrap();
        assert_ne!(fresh, ids[0]);
    }

    #[test]
    fn test_integrity_detects_cycle() {
        let (store, fact) = store_with_fact();
        let mut tms = TruthMaintenance::new();
        let ids = chain(&mut tms, &store, fact, 2);
        assert!(tms.check_integrity(&store).is_ok());

        tms.beliefs[0].justifications.push(Support::Belief(ids[1]));
        let err = tms.check_integrity(&store).unwrap_err();
        let KyroError::GraphCorruption { diagnostics, .. } = err else {
            panic!("expected graph corruption");
        };
        assert!(diagnostics.contains("Q1(a)"));
    }

    #[test]
    fn test_ties_are_deduplicated_and_drained() {
        let mut tms = TruthMaintenance::new();
        let tie = DefaultTie {
            goal: atom("Flies", "tweety"),
            rules: vec![ClauseId::from_raw(1), ClauseId::from_raw(2)],
        };
        tms.queue_tie(tie.clone());
        tms.queue_tie(tie);
        assert_eq!(tms.drain_ties().len(), 1);
        assert!(tms.drain_ties().is_empty());
    }
}
