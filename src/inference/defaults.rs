//! Default reasoning.
//!
//! A default `prerequisites : justifications ⇝ consequent` applies to a goal
//! when its consequent unifies with the goal, every prerequisite has a
//! classical proof, and no justification is classically refuted (its
//! explicit negation is not provable). Applicable defaults concluding the
//! negation of the goal compete through the configured `DefaultPolicy`.

use tracing::debug;

use crate::certainty::Certainty;
use crate::clause::{ClauseId, ClauseKind};
use crate::error::KyroResult;
use crate::inference::resolver::{apply_default_policy, Candidate, PolicyDecision};
use crate::inference::{Context, Solution};
use crate::substitution::Substitution;
use crate::term::Atom;
use crate::tms::{BeliefDraft, BeliefId, DefaultTie, DerivationKind, Support};
use crate::unify::unify_atoms;

#[derive(Debug, Clone)]
struct Application {
    clause: ClauseId,
    certainty: Certainty,
    conclusion: Atom,
    prerequisites: Solution,
    justifications: Vec<Atom>,
}

impl Application {
    fn candidate(&self) -> Candidate {
        Candidate {
            clause: self.clause,
            certainty: self.certainty,
        }
    }
}

/// Default conclusions for one goal.
#[derive(Debug, Default)]
pub(crate) struct Derivations {
    /// Each derived instance of the goal with its belief.
    pub beliefs: Vec<(Atom, BeliefId)>,
    /// Set if a prerequisite search was cut by the depth guard.
    pub cutoff: Option<String>,
}

pub(crate) struct DefaultReasoner<'a> {
    ctx: &'a Context,
}

impl<'a> DefaultReasoner<'a> {
    pub(crate) fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Derives instances of `goal` through default rules and records each
    /// as a `Default` belief.
    pub(crate) fn derive(&self, goal: &Atom) -> KyroResult<Derivations> {
        let mut out = Derivations::default();
        let supporting = self.applications(goal, &mut out.cutoff);
        if supporting.is_empty() {
            return Ok(out);
        }
        let opposing = self.applications(&goal.negate(), &mut out.cutoff);

        let mut groups: Vec<(Atom, Vec<Application>)> = Vec::new();
        for app in supporting {
            match groups.iter_mut().find(|(atom, _)| *atom == app.conclusion) {
                Some((_, apps)) => apps.push(app),
                None => groups.push((app.conclusion.clone(), vec![app])),
            }
        }

        for (conclusion, apps) in groups {
            let negation = conclusion.negate();
            let pro: Vec<Candidate> = apps.iter().map(Application::candidate).collect();
            let con: Vec<Candidate> = opposing
                .iter()
                .filter(|o| unify_atoms(&o.conclusion, &negation, &Substitution::new()).is_some())
                .map(Application::candidate)
                .collect();

            match apply_default_policy(self.ctx.policy, &pro, &con) {
                PolicyDecision::Selected(id) => {
                    let Some(app) = apps
                        .iter()
                        .filter(|a| a.clause == id)
                        .max_by(|a, b| a.certainty.total_cmp(&b.certainty))
                    else {
                        continue;
                    };
                    let belief = self.record(app)?;
                    out.beliefs.push((conclusion, belief));
                }
                PolicyDecision::Defeated(by) => {
                    debug!(goal = %conclusion, %by, "default defeated by opposing default");
                }
                PolicyDecision::Unresolved(rules) => {
                    debug!(goal = %conclusion, ?rules, "defaults tie");
                    self.ctx.with_tms(|tms| {
                        tms.queue_tie(DefaultTie {
                            goal: conclusion.clone(),
                            rules,
                        });
                        Ok(())
                    })?;
                }
                PolicyDecision::NoCandidate => {}
            }
        }
        Ok(out)
    }

    /// Every applicable instance of every default concluding `goal`.
    fn applications(&self, goal: &Atom, cutoff: &mut Option<String>) -> Vec<Application> {
        let mut out = Vec::new();
        let store = &self.ctx.store;
        for clause in store.lookup_by_functor(&goal.signature()) {
            if !clause.kind.is_default() {
                continue;
            }
            let ClauseKind::Default {
                prerequisites,
                justifications,
                consequent,
            } = clause.kind.freshen(self.ctx.fresh.next())
            else {
                continue;
            };
            let Some(theta) = unify_atoms(goal, &consequent, &Substitution::new()) else {
                continue;
            };

            let mut search = self.ctx.search(&prerequisites, theta);
            for solution in search.by_ref() {
                let instances: Vec<Atom> = justifications.iter().map(|j| j.apply(&solution.subst)).collect();
                if let Some(refuted) = instances.iter().find(|j| self.is_refuted(j)) {
                    debug!(clause = %clause.id, justification = %refuted, "default blocked");
                    continue;
                }
                out.push(Application {
                    clause: clause.id,
                    certainty: clause.certainty.and(solution.certainty()),
                    conclusion: consequent.apply(&solution.subst),
                    prerequisites: solution,
                    justifications: instances,
                });
            }
            if let Some(goal) = search.cutoff() {
                cutoff.get_or_insert_with(|| goal.to_string());
            }
        }
        out
    }

    /// A justification is refuted when its explicit negation is classically
    /// provable. A check cut short by the depth guard counts as refuted.
    pub(crate) fn is_refuted(&self, justification: &Atom) -> bool {
        self.ctx.provable(&justification.negate(), true)
    }

    fn record(&self, app: &Application) -> KyroResult<BeliefId> {
        let store = &self.ctx.store;
        self.ctx.with_tms(|tms| {
            let mut justifications = Vec::with_capacity(app.prerequisites.proofs.len() + app.justifications.len() + 1);
            for proof in &app.prerequisites.proofs {
                let premise = proof.record(&app.prerequisites.subst, tms, store)?;
                justifications.push(Support::Belief(premise));
            }
            justifications.push(Support::Clause(app.clause));
            justifications.extend(app.justifications.iter().cloned().map(Support::Unrefuted));
            tms.record(
                BeliefDraft {
                    atom: app.conclusion.clone(),
                    kind: DerivationKind::Default,
                    justifications,
                    certainty: app.certainty,
                },
                store,
            )
        })
    }
}
