//! Beliefs: derived atoms together with the premises that entail them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::certainty::Certainty;
use crate::clause::ClauseId;
use crate::term::Atom;

/// Identifier of a belief instance. A fresh derivation after invalidation
/// gets a new id; ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BeliefId(u64);

impl BeliefId {
    /// Wraps a raw id. Ids are issued from 1 in recording order.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BeliefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// How a belief was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivationKind {
    /// SLD resolution over facts and rules only.
    Classical,
    /// At least one default rule was applied.
    Default,
}

impl fmt::Display for DerivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classical => write!(f, "classical"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Lifecycle of a belief.
///
/// ```text
/// Supported ──premise lost──▶ Orphaned ──re-derived──▶ Supported
///                                 │
///                                 └──no alternative──▶ Invalidated (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeliefState {
    /// Every justification holds.
    Supported,
    /// A justification was withdrawn; re-proved on next use.
    Orphaned,
    /// No derivation survives. Terminal.
    Invalidated,
}

impl fmt::Display for BeliefState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Supported => write!(f, "supported"),
            Self::Orphaned => write!(f, "orphaned"),
            Self::Invalidated => write!(f, "invalidated"),
        }
    }
}

/// One premise of a belief. Edges of the justification graph point from a
/// belief to each of these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "ref", rename_all = "snake_case")]
pub enum Support {
    /// A stored fact, rule or default rule.
    Clause(ClauseId),
    /// Another derived belief.
    Belief(BeliefId),
    /// Standing assumption that a default's justification stays unrefuted.
    Unrefuted(Atom),
}

impl fmt::Display for Support {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clause(id) => write!(f, "{id}"),
            Self::Belief(id) => write!(f, "{id}"),
            Self::Unrefuted(atom) => write!(f, "unrefuted({atom})"),
        }
    }
}

/// A belief about to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct BeliefDraft {
    /// The derived atom.
    pub atom: Atom,
    /// Classical or default derivation.
    pub kind: DerivationKind,
    /// Premises of the derivation.
    pub justifications: Vec<Support>,
    /// Minimum certainty over the premises.
    pub certainty: Certainty,
}

/// A derived atom and its justification set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Belief {
    /// Id in recording order.
    pub id: BeliefId,
    /// The derived atom.
    pub atom: Atom,
    /// Classical or default derivation.
    pub kind: DerivationKind,
    /// Premises of the current derivation.
    pub justifications: Vec<Support>,
    /// Where the belief is in its lifecycle.
    pub state: BeliefState,
    /// Minimum certainty over the premises.
    pub certainty: Certainty,
    /// When the current derivation was recorded.
    pub derived_at: DateTime<Utc>,
}

impl Belief {
    /// True in state `Supported`.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.state == BeliefState::Supported
    }

    /// Justification atoms this belief assumes unrefuted.
    pub fn assumptions(&self) -> impl Iterator<Item = &Atom> {
        self.justifications.iter().filter_map(|s| match s {
            Support::Unrefuted(atom) => Some(atom),
            _ => None,
        })
    }
}

impl fmt::Display for Belief {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}, {}]", self.id, self.atom, self.kind, self.state)
    }
}
