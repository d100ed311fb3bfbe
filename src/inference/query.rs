//! Query evaluation: classical resolution first, default reasoning as a
//! fallback, results streamed lazily.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::certainty::Certainty;
use crate::engine::KnowledgeBase;
use crate::error::{ExecutionError, KyroError, KyroResult};
use crate::inference::{Context, DefaultReasoner, ProofSearch, Solution};
use crate::substitution::Substitution;
use crate::term::{Atom, Variable};
use crate::tms::{Belief, BeliefId, BeliefState, DerivationKind};
use crate::unify::unify_atoms;

/// Whether a query may fall back to default rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueryMode {
    Classical,
    WithDefaults,
}

/// One answer to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnswer {
    /// Bindings of the query's variables. Variables the proof left free
    /// are named `_0`, `_1`, ...
    pub bindings: Substitution,
    /// One belief per conjunct, in goal order.
    pub beliefs: Vec<Belief>,
    /// `Default` if any conjunct needed a default rule.
    pub kind: DerivationKind,
    /// Minimum certainty over everything the answer rests on.
    pub certainty: Certainty,
}

impl QueryAnswer {
    /// True if the answer's certainty meets `threshold`.
    #[must_use]
    pub fn is_true(&self, threshold: f32) -> bool {
        self.certainty.meets(threshold)
    }

    /// Value bound to a query variable, by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&crate::term::Term> {
        self.bindings.get(&Variable::new(name))
    }
}

struct Frame {
    index: usize,
    beliefs: Vec<BeliefId>,
    alternatives: VecDeque<(Substitution, BeliefId)>,
}

enum Phase {
    Start,
    Classical(ProofSearch),
    Defaults(Vec<Frame>),
    Report,
    Done,
}

/// A lazy, restartable stream of answers.
///
/// Each call to `next` performs only the search needed for one more answer.
/// If any branch was cut by the depth guard, the stream ends with a single
/// `ExecutionError::DepthExceeded` item after the last answer, so "no proof"
/// and "gave up looking" stay distinguishable.
pub struct Query {
    kb: KnowledgeBase,
    ctx: Context,
    goals: Vec<Atom>,
    vars: Vec<Variable>,
    mode: QueryMode,
    phase: Phase,
    seen: HashSet<Substitution>,
    answered: usize,
    cutoff: Option<String>,
    orphan: Option<BeliefId>,
}

impl Query {
    pub(crate) fn new(kb: KnowledgeBase, ctx: Context, goals: Vec<Atom>, mode: QueryMode) -> Self {
        let mut vars: Vec<Variable> = Vec::new();
        for goal in &goals {
            for var in goal.variables() {
                if !vars.contains(&var) {
                    vars.push(var);
                }
            }
        }
        Self {
            kb,
            ctx,
            goals,
            vars,
            mode,
            phase: Phase::Start,
            seen: HashSet::new(),
            answered: 0,
            cutoff: None,
            orphan: None,
        }
    }

    /// The goals being proved.
    #[must_use]
    pub fn goals(&self) -> &[Atom] {
        &self.goals
    }

    /// Starts the same query again against the latest knowledge base state.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the knowledge base lock is poisoned.
    pub fn restart(&self) -> KyroResult<Self> {
        let ctx = self.kb.context()?;
        Ok(Self::new(self.kb.clone(), ctx, self.goals.clone(), self.mode))
    }

    fn start(&mut self) -> KyroResult<Option<QueryAnswer>> {
        if let [goal] = self.goals.as_slice() {
            if goal.is_ground() {
                let cached = self.ctx.with_tms(|tms| {
                    Ok(tms.cached(goal, DerivationKind::Classical).cloned())
                })?;
                match cached {
                    Some(belief) if belief.is_supported() => {
                        debug!(goal = %goal, belief = %belief.id, "answered from belief cache");
                        self.phase = Phase::Report;
                        return Ok(self.accept(Substitution::new(), vec![belief]));
                    }
                    Some(belief) => self.orphan = Some(belief.id),
                    None => {}
                }
            }
        }
        self.phase = Phase::Classical(self.ctx.search(&self.goals, Substitution::new()));
        Ok(None)
    }

    fn classical_answer(&mut self, solution: &Solution) -> KyroResult<Option<QueryAnswer>> {
        let store = &self.ctx.store;
        let beliefs = self.ctx.with_tms(|tms| {
            let mut out = Vec::with_capacity(solution.proofs.len());
            for proof in &solution.proofs {
                let id = proof.record(&solution.subst, tms, store)?;
                if let Some(belief) = tms.get(id) {
                    out.push(belief.clone());
                }
            }
            Ok(out)
        })?;
        Ok(self.accept(solution.subst.clone(), beliefs))
    }

    /// Dedupes on projected bindings and builds the answer.
    fn accept(&mut self, subst: Substitution, beliefs: Vec<Belief>) -> Option<QueryAnswer> {
        let bindings = subst.project(&self.vars);
        if !self.seen.insert(bindings.clone()) {
            return None;
        }
        self.answered += 1;
        let kind = if beliefs.iter().any(|b| b.kind == DerivationKind::Default) {
            DerivationKind::Default
        } else {
            DerivationKind::Classical
        };
        let certainty = beliefs
            .iter()
            .fold(Certainty::one(), |acc, b| acc.and(b.certainty));
        Some(QueryAnswer {
            bindings,
            beliefs,
            kind,
            certainty,
        })
    }

    fn note_cutoff(&mut self, goal: Option<&str>) {
        if let Some(goal) = goal {
            self.cutoff.get_or_insert_with(|| goal.to_string());
        }
    }

    /// Invalidates the cached orphan for a ground goal if this query did
    /// not re-support it.
    fn settle_orphan(&mut self) -> KyroResult<()> {
        let Some(id) = self.orphan.take() else {
            return Ok(());
        };
        self.ctx.with_tms(|tms| {
            if tms.get(id).map(|b| b.state) == Some(BeliefState::Orphaned) {
                tms.invalidate(id)?;
            }
            Ok(())
        })
    }

    /// Solutions of conjunct `index` under `subst`: classical proofs, or
    /// default derivations if there are none.
    fn solve_conjunct(&mut self, index: usize, subst: &Substitution) -> KyroResult<VecDeque<(Substitution, BeliefId)>> {
        let goal = self.goals[index].clone();
        let mut out = VecDeque::new();

        let mut search = self.ctx.search(std::slice::from_ref(&goal), subst.clone());
        let solutions: Vec<Solution> = search.by_ref().collect();
        let cut = search.cutoff().map(str::to_string);
        self.note_cutoff(cut.as_deref());

        if !solutions.is_empty() {
            let store = &self.ctx.store;
            self.ctx.with_tms(|tms| {
                for solution in &solutions {
                    if let Some(proof) = solution.proofs.first() {
                        out.push_back((solution.subst.clone(), proof.record(&solution.subst, tms, store)?));
                    }
                }
                Ok(())
            })?;
            return Ok(out);
        }

        let instance = goal.apply(subst);
        let derived = DefaultReasoner::new(&self.ctx).derive(&instance)?;
        self.note_cutoff(derived.cutoff.as_deref());
        for (conclusion, belief) in derived.beliefs {
            if let Some(next) = unify_atoms(&goal, &conclusion, subst) {
                out.push_back((next, belief));
            }
        }
        Ok(out)
    }

    fn start_defaults(&mut self) -> KyroResult<()> {
        if let [goal] = self.goals.as_slice() {
            if goal.is_ground() {
                let cached = self.ctx.with_tms(|tms| {
                    Ok(tms
                        .cached(goal, DerivationKind::Default)
                        .filter(|b| b.state == BeliefState::Orphaned)
                        .map(|b| b.id))
                })?;
                self.orphan = cached;
            }
        }
        let alternatives = self.solve_conjunct(0, &Substitution::new())?;
        self.phase = Phase::Defaults(vec![Frame {
            index: 0,
            beliefs: Vec::new(),
            alternatives,
        }]);
        Ok(())
    }

    /// Depth-first walk over conjuncts, one alternative at a time.
    fn next_mixed(&mut self, mut stack: Vec<Frame>) -> KyroResult<Option<QueryAnswer>> {
        loop {
            let Some(top) = stack.last_mut() else {
                self.settle_orphan()?;
                self.phase = Phase::Report;
                return Ok(None);
            };
            let Some((subst, belief)) = top.alternatives.pop_front() else {
                stack.pop();
                continue;
            };
            let mut beliefs = top.beliefs.clone();
            beliefs.push(belief);
            let index = top.index + 1;

            if index == self.goals.len() {
                let resolved = self.ctx.with_tms(|tms| {
                    Ok(beliefs.iter().filter_map(|id| tms.get(*id).cloned()).collect::<Vec<_>>())
                })?;
                if let Some(answer) = self.accept(subst, resolved) {
                    self.phase = Phase::Defaults(stack);
                    return Ok(Some(answer));
                }
                continue;
            }

            let alternatives = self.solve_conjunct(index, &subst)?;
            stack.push(Frame {
                index,
                beliefs,
                alternatives,
            });
        }
    }

    fn step(&mut self) -> KyroResult<Option<QueryAnswer>> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Start => {
                    if let Some(answer) = self.start()? {
                        return Ok(Some(answer));
                    }
                }
                Phase::Classical(mut search) => match search.next_solution() {
                    Some(solution) => {
                        self.phase = Phase::Classical(search);
                        if let Some(answer) = self.classical_answer(&solution)? {
                            return Ok(Some(answer));
                        }
                    }
                    None => {
                        self.note_cutoff(search.cutoff());
                        self.settle_orphan()?;
                        if self.answered == 0 && self.mode == QueryMode::WithDefaults {
                            self.start_defaults()?;
                        } else {
                            self.phase = Phase::Report;
                        }
                    }
                },
                Phase::Defaults(stack) => {
                    if let Some(answer) = self.next_mixed(stack)? {
                        return Ok(Some(answer));
                    }
                }
                Phase::Report => {
                    if let Some(goal) = self.cutoff.take() {
                        warn!(goal = %goal, limit = self.ctx.limits.max_depth, "query hit the depth guard");
                        return Err(ExecutionError::DepthExceeded {
                            goal,
                            limit: self.ctx.limits.max_depth,
                        }
                        .into());
                    }
                    return Ok(None);
                }
                Phase::Done => return Ok(None),
            }
        }
    }
}

impl Iterator for Query {
    type Item = KyroResult<QueryAnswer>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(answer) => answer.map(Ok),
            Err(e) => {
                self.phase = Phase::Done;
                Some(Err(e))
            }
        }
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("goals", &self.goals)
            .field("mode", &self.mode)
            .field("answered", &self.answered)
            .finish_non_exhaustive()
    }
}

/// Beliefs proved for a single goal.
#[derive(Debug)]
pub struct Proofs(Query);

impl Proofs {
    pub(crate) fn new(query: Query) -> Self {
        Self(query)
    }

    /// Starts the same proof again against the latest state.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the knowledge base lock is poisoned.
    pub fn restart(&self) -> KyroResult<Self> {
        Ok(Self(self.0.restart()?))
    }
}

impl Iterator for Proofs {
    type Item = KyroResult<Belief>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|item| {
            item.and_then(|answer| {
                answer
                    .beliefs
                    .into_iter()
                    .next()
                    .ok_or_else(|| KyroError::internal("answer without a belief"))
            })
        })
    }
}

/// Substitutions solving a conjunction.
#[derive(Debug)]
pub struct Bindings(Query);

impl Bindings {
    pub(crate) fn new(query: Query) -> Self {
        Self(query)
    }

    /// Starts the same query again against the latest state.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the knowledge base lock is poisoned.
    pub fn restart(&self) -> KyroResult<Self> {
        Ok(Self(self.0.restart()?))
    }
}

impl Iterator for Bindings {
    type Item = KyroResult<Substitution>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|item| item.map(|answer| answer.bindings))
    }
}
