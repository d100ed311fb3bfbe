//! Justification trees for derived beliefs.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::clause::{Clause, ClauseId};
use crate::error::{KyroError, KyroResult};
use crate::storage::ClauseStore;
use crate::term::Atom;
use crate::tms::{Belief, BeliefId, Support, TruthMaintenance};

/// A belief with everything it rests on, expanded down to clauses and
/// default assumptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    /// The belief being explained.
    pub belief: Belief,
    /// One node per justification, in recorded order.
    pub supports: Vec<SupportNode>,
}

/// One premise in an explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupportNode {
    /// A clause premise.
    Clause {
        /// The premise clause.
        clause: Clause,
    },
    /// A derived premise, expanded recursively.
    Belief {
        /// How the premise was derived.
        explanation: Box<Explanation>,
    },
    /// A default justification assumed consistent.
    Unrefuted {
        /// The assumed atom.
        atom: Atom,
    },
}

impl Explanation {
    /// Every clause the belief transitively rests on.
    #[must_use]
    pub fn clauses(&self) -> BTreeSet<ClauseId> {
        let mut out = BTreeSet::new();
        self.walk(&mut |node| {
            if let SupportNode::Clause { clause } = node {
                out.insert(clause.id);
            }
        });
        out
    }

    /// Every default assumption the belief transitively rests on, without
    /// duplicates.
    #[must_use]
    pub fn assumptions(&self) -> Vec<Atom> {
        let mut out: Vec<Atom> = Vec::new();
        self.walk(&mut |node| {
            if let SupportNode::Unrefuted { atom } = node {
                if !out.contains(atom) {
                    out.push(atom.clone());
                }
            }
        });
        out
    }

    /// Renders the tree one premise per line, indented by depth.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let _ = writeln!(out, "{:indent$}{}", "", self.belief, indent = depth * 2);
        for node in &self.supports {
            match node {
                SupportNode::Clause { clause } => {
                    let _ = writeln!(out, "{:indent$}{clause}", "", indent = (depth + 1) * 2);
                }
                SupportNode::Belief { explanation } => explanation.render_into(out, depth + 1),
                SupportNode::Unrefuted { atom } => {
                    let _ = writeln!(out, "{:indent$}assume {atom}", "", indent = (depth + 1) * 2);
                }
            }
        }
    }

    fn walk(&self, f: &mut impl FnMut(&SupportNode)) {
        for node in &self.supports {
            f(node);
            if let SupportNode::Belief { explanation } = node {
                explanation.walk(f);
            }
        }
    }
}

pub(crate) fn explain(tms: &TruthMaintenance, store: &ClauseStore, id: BeliefId) -> KyroResult<Option<Explanation>> {
    match tms.get(id) {
        Some(belief) => expand(tms, store, belief).map(Some),
        None => Ok(None),
    }
}

fn expand(tms: &TruthMaintenance, store: &ClauseStore, belief: &Belief) -> KyroResult<Explanation> {
    let dangling = |support: &Support| {
        KyroError::graph_corruption(
            format!("{} has an edge to nonexistent {support}", belief.id),
            tms.dump(),
        )
    };

    let mut supports = Vec::with_capacity(belief.justifications.len());
    for support in &belief.justifications {
        supports.push(match support {
            Support::Clause(id) => SupportNode::Clause {
                clause: store.get(*id).cloned().ok_or_else(|| dangling(support))?,
            },
            Support::Belief(id) => {
                let premise = tms.get(*id).ok_or_else(|| dangling(support))?;
                SupportNode::Belief {
                    explanation: Box::new(expand(tms, store, premise)?),
                }
            }
            Support::Unrefuted(atom) => SupportNode::Unrefuted { atom: atom.clone() },
        });
    }
    Ok(Explanation {
        belief: belief.clone(),
        supports,
    })
}
