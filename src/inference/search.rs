//! Lazy SLD resolution.
//!
//! The search keeps an explicit stack of choice points instead of
//! recursing, so each call to `next_solution` does exactly the work needed
//! for one more answer and can be abandoned at any time. Resolvents and
//! partial proofs are persistent lists, which makes saving a choice point
//! an `Arc` clone.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::certainty::Certainty;
use crate::clause::{Clause, ClauseId, ClauseKind};
use crate::config::EngineConfig;
use crate::error::KyroResult;
use crate::storage::ClauseStore;
use crate::substitution::Substitution;
use crate::term::Atom;
use crate::tms::{BeliefDraft, BeliefId, DerivationKind, Support, TruthMaintenance};
use crate::unify::unify_atoms;

/// Source of renaming stamps. One is shared by every search a query
/// starts, so nested searches never reuse a stamp.
#[derive(Debug, Clone, Default)]
pub(crate) struct Freshener(Arc<AtomicU64>);

impl Freshener {
    pub(crate) fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Termination guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SearchLimits {
    pub max_depth: usize,
    pub max_recursion: usize,
    pub max_steps: usize,
}

impl From<&EngineConfig> for SearchLimits {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            max_recursion: config.max_recursion,
            max_steps: config.max_steps,
        }
    }
}

#[derive(Debug)]
struct Cons<T> {
    head: T,
    tail: List<T>,
}

/// Immutable singly linked list with shared tails.
#[derive(Debug)]
struct List<T>(Option<Arc<Cons<T>>>);

impl<T> Clone for List<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T: Clone> List<T> {
    fn push(&self, head: T) -> Self {
        Self(Some(Arc::new(Cons {
            head,
            tail: self.clone(),
        })))
    }

    fn pop(&self) -> Option<(T, Self)> {
        self.0.as_ref().map(|cell| (cell.head.clone(), cell.tail.clone()))
    }

    fn iter(&self) -> impl Iterator<Item = &T> {
        std::iter::successors(self.0.as_deref(), |cell| cell.tail.0.as_deref()).map(|cell| &cell.head)
    }
}

/// A completed derivation of one goal.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProofNode {
    /// The goal as it was selected; apply the solution's substitution to
    /// get the proved instance.
    pub atom: Atom,
    pub clause: ClauseId,
    /// Minimum certainty over every clause in the subtree.
    pub certainty: Certainty,
    pub children: Vec<Arc<ProofNode>>,
}

impl ProofNode {
    /// Every clause used anywhere in this proof.
    pub(crate) fn collect_clauses(&self, out: &mut BTreeSet<ClauseId>) {
        out.insert(self.clause);
        for child in &self.children {
            child.collect_clauses(out);
        }
    }

    /// Records this proof bottom-up as classical beliefs and returns the
    /// belief for the root.
    pub(crate) fn record(
        &self,
        subst: &Substitution,
        tms: &mut TruthMaintenance,
        store: &ClauseStore,
    ) -> KyroResult<BeliefId> {
        let mut justifications = Vec::with_capacity(self.children.len() + 1);
        justifications.push(Support::Clause(self.clause));
        for child in &self.children {
            justifications.push(Support::Belief(child.record(subst, tms, store)?));
        }
        tms.record(
            BeliefDraft {
                atom: self.atom.apply(subst),
                kind: DerivationKind::Classical,
                justifications,
                certainty: self.certainty,
            },
            store,
        )
    }
}

/// One answer of a search: the bindings and one proof per top-level goal.
#[derive(Debug, Clone)]
pub(crate) struct Solution {
    pub subst: Substitution,
    pub proofs: Vec<Arc<ProofNode>>,
}

impl Solution {
    #[must_use]
    pub(crate) fn certainty(&self) -> Certainty {
        self.proofs
            .iter()
            .fold(Certainty::one(), |acc, p| acc.and(p.certainty))
    }

    pub(crate) fn clauses(&self) -> BTreeSet<ClauseId> {
        let mut out = BTreeSet::new();
        for proof in &self.proofs {
            proof.collect_clauses(&mut out);
        }
        out
    }
}

#[derive(Debug, Clone)]
struct Goal {
    atom: Atom,
    depth: usize,
    /// The goals this one was reduced from, innermost first, instantiated
    /// as far as they were when reduced.
    ancestors: List<Atom>,
}

#[derive(Debug, Clone)]
enum Item {
    Prove(Goal),
    /// All body goals of a rule are proved; fold their proofs into one node.
    Close {
        atom: Atom,
        clause: ClauseId,
        certainty: Certainty,
        arity: usize,
    },
}

#[derive(Debug, Clone)]
struct State {
    resolvent: List<Item>,
    done: List<Arc<ProofNode>>,
    subst: Substitution,
}

#[derive(Debug)]
struct Choice {
    base: State,
    goal: Goal,
    candidates: Vec<ClauseId>,
    next: usize,
}

/// Depth-first, left-to-right SLD resolution over active facts and rules.
/// Each goal tries the matching facts first, then the rules, both in
/// insertion order.
#[derive(Debug)]
pub(crate) struct ProofSearch {
    store: Arc<ClauseStore>,
    limits: SearchLimits,
    fresh: Freshener,
    exclude: Arc<HashSet<ClauseId>>,
    current: Option<State>,
    choices: Vec<Choice>,
    steps: usize,
    cutoff: Option<String>,
}

impl ProofSearch {
    /// Starts a search for the conjunction `goals` under `subst`.
    pub(crate) fn new(
        store: Arc<ClauseStore>,
        goals: &[Atom],
        subst: Substitution,
        limits: SearchLimits,
        fresh: Freshener,
    ) -> Self {
        let mut resolvent = List::default();
        for atom in goals.iter().rev() {
            resolvent = resolvent.push(Item::Prove(Goal {
                atom: atom.clone(),
                depth: 0,
                ancestors: List::default(),
            }));
        }
        Self {
            store,
            limits,
            fresh,
            exclude: Arc::default(),
            current: Some(State {
                resolvent,
                done: List::default(),
                subst,
            }),
            choices: Vec::new(),
            steps: 0,
            cutoff: None,
        }
    }

    /// Treats the given clauses as absent.
    #[must_use]
    pub(crate) fn excluding(mut self, exclude: Arc<HashSet<ClauseId>>) -> Self {
        self.exclude = exclude;
        self
    }

    /// The first goal whose branch was cut by the depth, recursion or step
    /// guard.
    pub(crate) fn cutoff(&self) -> Option<&str> {
        self.cutoff.as_deref()
    }

    pub(crate) fn next_solution(&mut self) -> Option<Solution> {
        loop {
            let Some(state) = self.current.take() else {
                if !self.backtrack() {
                    return None;
                }
                continue;
            };

            let Some((item, rest)) = state.resolvent.pop() else {
                let mut proofs: Vec<_> = state.done.iter().cloned().collect();
                proofs.reverse();
                return Some(Solution {
                    subst: state.subst,
                    proofs,
                });
            };

            match item {
                Item::Close {
                    atom,
                    clause,
                    certainty,
                    arity,
                } => {
                    let mut done = state.done;
                    let mut children = Vec::with_capacity(arity);
                    for _ in 0..arity {
                        if let Some((child, tail)) = done.pop() {
                            children.push(child);
                            done = tail;
                        }
                    }
                    children.reverse();
                    let certainty = children.iter().fold(certainty, |acc, c| acc.and(c.certainty));
                    let node = Arc::new(ProofNode {
                        atom,
                        clause,
                        certainty,
                        children,
                    });
                    self.current = Some(State {
                        resolvent: rest,
                        done: done.push(node),
                        subst: state.subst,
                    });
                }
                Item::Prove(goal) => {
                    let instance = goal.atom.apply(&state.subst);
                    if self.exceeds_limits(&goal, &instance, &state.subst) {
                        debug!(goal = %instance, depth = goal.depth, "proof branch cut");
                        self.cutoff.get_or_insert_with(|| instance.to_string());
                        continue;
                    }
                    let (mut candidates, rules): (Vec<_>, Vec<_>) = self
                        .store
                        .lookup_by_functor(&goal.atom.signature())
                        .filter(|c| !c.kind.is_default() && !self.exclude.contains(&c.id))
                        .partition(|c| c.kind.is_fact());
                    candidates.extend(rules);
                    let candidates = candidates.into_iter().map(|c| c.id).collect();
                    self.choices.push(Choice {
                        base: State {
                            resolvent: rest,
                            done: state.done,
                            subst: state.subst,
                        },
                        goal,
                        candidates,
                        next: 0,
                    });
                }
            }
        }
    }

    /// Depth bound, plus the number of ancestors that `instance` repeats up
    /// to variable renaming.
    fn exceeds_limits(&self, goal: &Goal, instance: &Atom, subst: &Substitution) -> bool {
        if goal.depth >= self.limits.max_depth {
            return true;
        }
        let signature = instance.signature();
        let recurrences = goal
            .ancestors
            .iter()
            .filter(|a| {
                a.signature() == signature
                    && if a.is_ground() {
                        *a == instance
                    } else {
                        a.apply(subst).is_variant(instance)
                    }
            })
            .count();
        recurrences >= self.limits.max_recursion
    }

    /// Abandons the whole search once the step budget is spent.
    fn exhaust(&mut self, goal: &Atom) {
        debug!(goal = %goal, steps = self.steps, "proof search step budget spent");
        self.cutoff.get_or_insert_with(|| goal.to_string());
        self.choices.clear();
        self.current = None;
    }

    /// Resumes the most recent choice point with its next unifying clause.
    fn backtrack(&mut self) -> bool {
        while let Some(choice) = self.choices.last_mut() {
            while choice.next < choice.candidates.len() {
                if self.steps >= self.limits.max_steps {
                    let goal = choice.goal.atom.apply(&choice.base.subst);
                    self.exhaust(&goal);
                    return false;
                }
                self.steps += 1;
                let id = choice.candidates[choice.next];
                choice.next += 1;
                let Some(clause) = self.store.get(id) else {
                    continue;
                };
                let kind = clause.kind.freshen(self.fresh.next());
                let Some(subst) = unify_atoms(&choice.goal.atom, kind.head(), &choice.base.subst) else {
                    continue;
                };
                if let Some(state) = expand(&choice.base, &choice.goal, clause, kind, subst) {
                    self.current = Some(state);
                    return true;
                }
            }
            self.choices.pop();
        }
        false
    }
}

impl Iterator for ProofSearch {
    type Item = Solution;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_solution()
    }
}

/// Replaces the selected goal by the clause body (or closes it for a fact).
fn expand(base: &State, goal: &Goal, clause: &Clause, kind: ClauseKind, subst: Substitution) -> Option<State> {
    match kind {
        ClauseKind::Fact { .. } => Some(State {
            resolvent: base.resolvent.clone(),
            done: base.done.push(Arc::new(ProofNode {
                atom: goal.atom.clone(),
                clause: clause.id,
                certainty: clause.certainty,
                children: Vec::new(),
            })),
            subst,
        }),
        ClauseKind::Rule { body, .. } => {
            let ancestors = goal.ancestors.push(goal.atom.apply(&subst));
            let mut resolvent = base.resolvent.push(Item::Close {
                atom: goal.atom.clone(),
                clause: clause.id,
                certainty: clause.certainty,
                arity: body.len(),
            });
            for atom in body.into_iter().rev() {
                resolvent = resolvent.push(Item::Prove(Goal {
                    atom,
                    depth: goal.depth + 1,
                    ancestors: ancestors.clone(),
                }));
            }
            Some(State {
                resolvent,
                done: base.done.clone(),
                subst,
            })
        }
        ClauseKind::Default { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::clause::ClauseDraft;
    use crate::term::{Term, Variable};

    fn atom(f: &str, args: impl IntoIterator<Item = Term>) -> Atom {
        Atom::new(f, args).unwrap()
    }

    fn c(name: &str) -> Term {
        Term::constant(name)
    }

    fn v(name: &str) -> Term {
        Term::var(name)
    }

    fn limits() -> SearchLimits {
        SearchLimits {
            max_depth: 32,
            max_recursion: 8,
            max_steps: 10_000,
        }
    }

    fn search(store: &ClauseStore, goals: &[Atom]) -> ProofSearch {
        ProofSearch::new(
            Arc::new(store.clone()),
            goals,
            Substitution::new(),
            limits(),
            Freshener::default(),
        )
    }

    fn family() -> ClauseStore {
        let mut store = ClauseStore::new();
        for (p, child) in [("tom", "bob"), ("bob", "ann"), ("bob", "pat")] {
            store
                .assert_at(ClauseDraft::fact(atom("parent", [c(p), c(child)])), Utc::now())
                .unwrap();
        }
        store
            .assert_at(
                ClauseDraft::rule(
                    vec![atom("parent", [v("X"), v("Y")]), atom("parent", [v("Y"), v("Z")])],
                    atom("grandparent", [v("X"), v("Z")]),
                ),
                Utc::now(),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_facts_in_insertion_order() {
        let store = family();
        let x = Variable::new("X");
        let answers: Vec<_> = search(&store, &[atom("parent", [c("bob"), v("X")])])
            .map(|s| s.subst.resolve(&x).unwrap().to_string())
            .collect();
        assert_eq!(answers, vec!["ann", "pat"]);
    }

    #[test]
    fn test_rule_resolution_builds_proof_tree() {
        let store = family();
        let goal = atom("grandparent", [c("tom"), v("W")]);
        let solutions: Vec<_> = search(&store, &[goal]).collect();
        assert_eq!(solutions.len(), 2);

        let first = &solutions[0];
        assert_eq!(first.subst.resolve(&Variable::new("W")), Some(c("ann")));
        let proof = &first.proofs[0];
        assert_eq!(proof.clause, ClauseId::from_raw(4));
        assert_eq!(proof.children.len(), 2);
        assert_eq!(
            proof.children[0].atom.apply(&first.subst).to_string(),
            "parent(tom, bob)"
        );
        assert_eq!(first.clauses().len(), 3);
    }

    #[test]
    fn test_conjunction_threads_bindings() {
        let store = family();
        let goals = [atom("parent", [v("A"), v("B")]), atom("parent", [v("B"), c("pat")])];
        let solutions: Vec<_> = search(&store, &goals).collect();
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0].subst.resolve(&Variable::new("A")), Some(c("tom")));
        assert_eq!(solutions[0].proofs.len(), 2);
    }

    #[test]
    fn test_left_recursion_is_cut_not_looped() {
        let mut store = ClauseStore::new();
        store
            .assert_at(
                ClauseDraft::rule(vec![atom("loop", [v("X")])], atom("loop", [v("X")])),
                Utc::now(),
            )
            .unwrap();
        let mut s = search(&store, &[atom("loop", [c("a")])]);
        assert!(s.next_solution().is_none());
        assert_eq!(s.cutoff(), Some("loop(a)"));
    }

    #[test]
    fn test_facts_before_rules() {
        let mut store = ClauseStore::new();
        store
            .assert_at(
                ClauseDraft::rule(vec![atom("p", [v("X")])], atom("q", [v("X")])),
                Utc::now(),
            )
            .unwrap();
        for draft in [ClauseDraft::fact(atom("p", [c("a")])), ClauseDraft::fact(atom("q", [c("b")]))] {
            store.assert_at(draft, Utc::now()).unwrap();
        }
        let y = Variable::new("Y");
        let answers: Vec<_> = search(&store, &[atom("q", [v("Y")])])
            .map(|s| s.subst.resolve(&y).unwrap().to_string())
            .collect();
        assert_eq!(answers, vec!["b", "a"]);
    }

    #[test]
    fn test_branching_recursion_spends_step_budget() {
        let mut store = ClauseStore::new();
        for var in ["X", "Y"] {
            store
                .assert_at(ClauseDraft::rule(vec![atom("p", [v(var)])], atom("p", [v(var)])), Utc::now())
                .unwrap();
        }
        let limits = SearchLimits {
            max_depth: 512,
            max_recursion: 64,
            max_steps: 5_000,
        };
        let mut s = ProofSearch::new(
            Arc::new(store),
            &[atom("p", [c("a")])],
            Substitution::new(),
            limits,
            Freshener::default(),
        );
        assert!(s.next_solution().is_none());
        assert_eq!(s.cutoff(), Some("p(a)"));
        assert_eq!(s.steps, 5_000);
        assert!(s.next_solution().is_none());
    }

    #[test]
    fn test_distinct_goals_are_not_recurrences() {
        let mut store = ClauseStore::new();
        store
            .assert_at(ClauseDraft::fact(atom("nat", [c("z")])), Utc::now())
            .unwrap();
        store
            .assert_at(
                ClauseDraft::rule(
                    vec![atom("nat", [v("N")])],
                    atom("nat", [Term::compound("s", [v("N")])]),
                ),
                Utc::now(),
            )
            .unwrap();
        // Ten nested successors exceed max_recursion but never repeat a goal.
        let mut n = c("z");
        for _ in 0..10 {
            n = Term::compound("s", [n]);
        }
        let mut s = search(&store, &[atom("nat", [n])]);
        assert!(s.next_solution().is_some());
    }

    #[test]
    fn test_excluded_clauses_are_skipped() {
        let store = family();
        let exclude: HashSet<_> = [ClauseId::from_raw(2)].into_iter().collect();
        let mut s = search(&store, &[atom("parent", [c("bob"), v("X")])]).excluding(Arc::new(exclude));
        let first = s.next_solution().unwrap();
        assert_eq!(first.subst.resolve(&Variable::new("X")), Some(c("pat")));
        assert!(s.next_solution().is_none());
        assert!(s.cutoff().is_none());
    }

    #[test]
    fn test_retracted_clauses_are_not_premises() {
        let mut store = family();
        store.retract_at(ClauseId::from_raw(1), "test", None, Utc::now());
        assert_eq!(search(&store, &[atom("grandparent", [v("X"), v("Y")])]).count(), 0);
    }

    #[test]
    fn test_rule_variables_do_not_capture_query_variables() {
        let mut store = ClauseStore::new();
        store
            .assert_at(ClauseDraft::fact(atom("p", [c("a"), c("b")])), Utc::now())
            .unwrap();
        store
            .assert_at(
                ClauseDraft::rule(vec![atom("p", [v("Y"), v("X")])], atom("q", [v("X"), v("Y")])),
                Utc::now(),
            )
            .unwrap();
        // Query variables share names with the rule's variables.
        let solutions: Vec<_> = search(&store, &[atom("q", [v("Y"), v("X")])]).collect();
        assert_eq!(solutions.len(), 1);
        let s = &solutions[0].subst;
        assert_eq!(s.resolve(&Variable::new("Y")), Some(c("b")));
        assert_eq!(s.resolve(&Variable::new("X")), Some(c("a")));
    }

    #[test]
    fn test_certainty_is_minimum_over_proof() {
        let mut store = ClauseStore::new();
        store
            .assert_at(
                ClauseDraft::fact(atom("human", [c("socrates")])).with_certainty(0.6).unwrap(),
                Utc::now(),
            )
            .unwrap();
        store
            .assert_at(
                ClauseDraft::rule(vec![atom("human", [v("X")])], atom("mortal", [v("X")]))
                    .with_certainty(0.9)
                    .unwrap(),
                Utc::now(),
            )
            .unwrap();
        let solution = search(&store, &[atom("mortal", [c("socrates")])]).next().unwrap();
        assert_eq!(solution.certainty().value(), 0.6);
    }
}
