//! Forward chaining.
//!
//! Walks every active rule, enumerates the solutions of its body and
//! records each ground head instance as a classical belief. Body goals are
//! solved by the same resolution engine as queries, so a single pass
//! already reaches the fixpoint reachable within the depth guard.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clause::ClauseKind;
use crate::error::KyroResult;
use crate::inference::Context;
use crate::substitution::Substitution;
use crate::tms::{BeliefDraft, BeliefId, DerivationKind, Support};

/// Outcome of a forward-chaining pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Materialization {
    /// Beliefs for every ground rule conclusion, in id order.
    pub beliefs: Vec<BeliefId>,
    /// First goal cut by the depth guard, if any. Conclusions behind it
    /// may be missing.
    pub cutoff: Option<String>,
}

pub(crate) fn materialize(ctx: &Context) -> KyroResult<Materialization> {
    let mut beliefs = BTreeSet::new();
    let mut cutoff = None;

    let rules: Vec<_> = ctx
        .store
        .iter()
        .filter(|c| c.is_active())
        .filter_map(|c| match &c.kind {
            ClauseKind::Rule { body, head } => Some((c.id, c.certainty, body.clone(), head.clone())),
            _ => None,
        })
        .collect();

    for (id, certainty, body, head) in rules {
        let mut search = ctx.search(&body, Substitution::new());
        for solution in search.by_ref() {
            let instance = head.apply(&solution.subst);
            if !instance.is_ground() {
                continue;
            }
            let store = &ctx.store;
            let belief = ctx.with_tms(|tms| {
                let mut justifications = vec![Support::Clause(id)];
                for proof in &solution.proofs {
                    justifications.push(Support::Belief(proof.record(&solution.subst, tms, store)?));
                }
                tms.record(
                    BeliefDraft {
                        atom: instance.clone(),
                        kind: DerivationKind::Classical,
                        justifications,
                        certainty: certainty.and(solution.certainty()),
                    },
                    store,
                )
            })?;
            beliefs.insert(belief);
        }
        if cutoff.is_none() {
            cutoff = search.cutoff().map(str::to_string);
        }
    }

    info!(beliefs = beliefs.len(), "forward chaining pass complete");
    Ok(Materialization {
        beliefs: beliefs.into_iter().collect(),
        cutoff,
    })
}
