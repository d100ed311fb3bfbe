//! Clauses: facts, rules and default rules, plus their status history.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::certainty::{Certainty, Provenance};
use crate::conflict::ConflictId;
use crate::error::ValidationError;
use crate::term::{Atom, Signature};

/// Stable clause identifier. Ids are assigned sequentially by the store, so
/// "lowest id" means "asserted first".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClauseId(u64);

impl ClauseId {
    /// Wraps a raw id. Ids are issued by the store starting at 1.
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

impl fmt::Display for ClauseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Lifecycle state of a clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClauseStatus {
    /// Usable as a premise.
    Active,
    /// Withdrawn by the auditor; kept for history only.
    Retracted,
}

impl Default for ClauseStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl fmt::Display for ClauseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Retracted => write!(f, "retracted"),
        }
    }
}

/// The logical content of a clause. Structural equality of this value is
/// what makes assertion idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClauseKind {
    /// A ground atom.
    Fact {
        /// The asserted atom.
        atom: Atom,
    },

    /// `body[0] ∧ ... ∧ body[n] ⟹ head`.
    Rule {
        /// Goals proved left to right.
        body: Vec<Atom>,
        /// The conclusion.
        head: Atom,
    },

    /// "If the prerequisites hold and no justification is known false,
    /// conclude the consequent."
    Default {
        /// Atoms that must be classically provable.
        prerequisites: Vec<Atom>,
        /// Atoms whose negations must not be provable.
        justifications: Vec<Atom>,
        /// The defeasible conclusion.
        consequent: Atom,
    },
}

impl ClauseKind {
    /// The atom this clause concludes; its signature is the index key.
    #[must_use]
    pub const fn head(&self) -> &Atom {
        match self {
            Self::Fact { atom } => atom,
            Self::Rule { head, .. } => head,
            Self::Default { consequent, .. } => consequent,
        }
    }

    /// Every atom in the clause, head first.
    pub fn atoms(&self) -> impl Iterator<Item = &Atom> {
        let rest: &[Atom] = match self {
            Self::Fact { .. } => &[],
            Self::Rule { body, .. } => body,
            Self::Default { prerequisites, .. } => prerequisites,
        };
        let justifications: &[Atom] = match self {
            Self::Default { justifications, .. } => justifications,
            _ => &[],
        };
        std::iter::once(self.head()).chain(rest).chain(justifications)
    }

    /// Index partition of the head.
    #[must_use]
    pub fn signature(&self) -> Signature {
        self.head().signature()
    }

    /// True for a ground fact.
    #[must_use]
    pub const fn is_fact(&self) -> bool {
        matches!(self, Self::Fact { .. })
    }

    /// True for `body ⟹ head`.
    #[must_use]
    pub const fn is_rule(&self) -> bool {
        matches!(self, Self::Rule { .. })
    }

    /// True for a default rule.
    #[must_use]
    pub const fn is_default(&self) -> bool {
        matches!(self, Self::Default { .. })
    }

    /// Checks structural well-formedness.
    ///
    /// # Errors
    ///
    /// - `MalformedTerm` if a fact is not ground
    /// - `EmptyBody` if a rule has no body atoms
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Fact { atom } => {
                atom.validate()?;
                if !atom.is_ground() {
                    return Err(ValidationError::MalformedTerm {
                        reason: format!("fact '{atom}' must be ground"),
                    });
                }
            }
            Self::Rule { body, head } => {
                if body.is_empty() {
                    return Err(ValidationError::EmptyBody);
                }
                head.validate()?;
                body.iter().try_for_each(Atom::validate)?;
            }
            Self::Default {
                prerequisites,
                justifications,
                consequent,
            } => {
                consequent.validate()?;
                prerequisites.iter().chain(justifications).try_for_each(Atom::validate)?;
            }
        }
        Ok(())
    }

    /// Renames every variable for proof branch `stamp`.
    #[must_use]
    pub(crate) fn freshen(&self, stamp: u64) -> Self {
        let fresh = |atoms: &[Atom]| -> Vec<Atom> { atoms.iter().map(|a| a.freshen(stamp)).collect() };
        match self {
            Self::Fact { .. } => self.clone(),
            Self::Rule { body, head } => Self::Rule {
                body: fresh(body),
                head: head.freshen(stamp),
            },
            Self::Default {
                prerequisites,
                justifications,
                consequent,
            } => Self::Default {
                prerequisites: fresh(prerequisites),
                justifications: fresh(justifications),
                consequent: consequent.freshen(stamp),
            },
        }
    }
}

impl fmt::Display for ClauseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |atoms: &[Atom]| {
            atoms
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ∧ ")
        };
        match self {
            Self::Fact { atom } => write!(f, "{atom}"),
            Self::Rule { body, head } => write!(f, "{} ⟹ {head}", join(body)),
            Self::Default {
                prerequisites,
                justifications,
                consequent,
            } => write!(
                f,
                "{} : {} ⇝ {consequent}",
                join(prerequisites),
                join(justifications)
            ),
        }
    }
}

/// A clause submitted on the write path, before an id is assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClauseDraft {
    /// The clause itself.
    pub kind: ClauseKind,
    /// Source the clause came from; `None` for axioms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    /// Certainty the source assigns; 1.0 unless set.
    pub certainty: Certainty,
}

impl ClauseDraft {
    /// A fact draft with full certainty and no provenance.
    #[must_use]
    pub fn fact(atom: Atom) -> Self {
        Self::new(ClauseKind::Fact { atom })
    }

    /// A rule draft `body ⟹ head`.
    #[must_use]
    pub fn rule(body: Vec<Atom>, head: Atom) -> Self {
        Self::new(ClauseKind::Rule { body, head })
    }

    /// A default rule draft `prerequisites : justifications ⇝ consequent`.
    #[must_use]
    pub fn default_rule(prerequisites: Vec<Atom>, justifications: Vec<Atom>, consequent: Atom) -> Self {
        Self::new(ClauseKind::Default {
            prerequisites,
            justifications,
            consequent,
        })
    }

    /// A normal default: the justification is the consequent itself
    /// ("conclude C unless ¬C is known").
    #[must_use]
    pub fn normal_default(prerequisites: Vec<Atom>, consequent: Atom) -> Self {
        Self::default_rule(prerequisites, vec![consequent.clone()], consequent)
    }

    fn new(kind: ClauseKind) -> Self {
        Self {
            kind,
            provenance: None,
            certainty: Certainty::one(),
        }
    }

    /// Sets the provenance.
    #[must_use]
    pub fn with_provenance(mut self, provenance: impl Into<Provenance>) -> Self {
        self.provenance = Some(provenance.into());
        self
    }

    /// Sets the certainty.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::CertaintyOutOfRange` for values outside [0, 1].
    pub fn with_certainty(mut self, certainty: f32) -> Result<Self, ValidationError> {
        self.certainty = Certainty::new(certainty)?;
        Ok(self)
    }
}

/// A stored clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    /// Stable id issued by the store.
    pub id: ClauseId,
    /// Fact, rule or default rule.
    pub kind: ClauseKind,
    /// Source of the clause; `None` for axioms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    /// Current certainty. Reinforcement can raise it.
    pub certainty: Certainty,
    /// Active or retracted.
    pub status: ClauseStatus,
    /// When the clause was first asserted.
    pub asserted_at: DateTime<Utc>,
}

impl Clause {
    /// True while the clause may be used as a premise.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == ClauseStatus::Active
    }

    /// Axioms are asserted directly (no provenance) with full certainty.
    #[must_use]
    pub fn is_axiom(&self) -> bool {
        self.provenance.is_none() && self.certainty.value() >= Certainty::MAX_VALUE
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.id, self.certainty, self.kind)
    }
}

/// What happened to a clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum ChangeKind {
    /// The clause entered the store.
    Asserted {
        /// Certainty at assertion time.
        certainty: Certainty,
    },

    /// A structurally identical clause arrived from another source with a
    /// higher certainty.
    Reinforced {
        /// Certainty before.
        from: Certainty,
        /// Certainty after.
        to: Certainty,
        /// Source that reinforced the clause.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provenance: Option<Provenance>,
    },

    /// The auditor retracted the clause.
    Retracted {
        /// Why the auditor retracted the clause.
        reason: String,
        /// Conflict that led to the retraction.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conflict_id: Option<ConflictId>,
    },
}

/// One entry of a clause's append-only history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    /// Clause the change applies to.
    pub clause_id: ClauseId,
    /// When the change happened.
    pub at: DateTime<Utc>,
    /// Status after the change.
    pub status: ClauseStatus,
    /// What changed.
    #[serde(flatten)]
    pub kind: ChangeKind,
}
