//! # KyroLog - Symbolic Inference with Default Reasoning
//!
//! KyroLog stores facts, rules and default rules over first-order atoms and
//! answers queries by SLD resolution. Default rules fill the gaps classical
//! knowledge leaves open, and every derived conclusion keeps the premises it
//! was derived from, so retracting a premise withdraws exactly what rested
//! on it.
//!
//! ## Core Concepts
//!
//! - **Clause**: a fact, a rule `body ⟹ head`, or a default rule
//!   `prerequisites : justifications ⇝ consequent`, with certainty and
//!   provenance
//! - **Belief**: a derived atom together with its justification set
//! - **Truth maintenance**: orphaning beliefs whose support was retracted
//! - **Audit**: finding contradictions and retracting the least certain
//!   clauses behind them
//!
//! ## Usage
//!
//! ```rust
//! use kyrolog::{Atom, EngineConfig, KnowledgeBase, Term};
//!
//! let kb = KnowledgeBase::new(EngineConfig::default())?;
//! let atom = |f: &str, t: Term| Atom::new(f, [t]);
//!
//! kb.assert_fact(atom("Bird", Term::constant("tweety"))?, Some("field guide"), 1.0)?;
//! kb.assert_fact(atom("Bird", Term::constant("pingu"))?, Some("field guide"), 1.0)?;
//! kb.assert_fact(atom("Penguin", Term::constant("pingu"))?, Some("zoo"), 1.0)?;
//! kb.assert_rule(
//!     vec![atom("Penguin", Term::var("X"))?],
//!     atom("Flies", Term::var("X"))?.negate(),
//!     Some("biology"),
//!     1.0,
//! )?;
//! kb.assert_default(
//!     vec![atom("Bird", Term::var("X"))?],
//!     vec![atom("Flies", Term::var("X"))?],
//!     atom("Flies", Term::var("X"))?,
//!     Some("folk wisdom"),
//!     0.9,
//! )?;
//!
//! let flies: Vec<_> = kb
//!     .query(vec![atom("Flies", Term::var("Y"))?])?
//!     .collect::<Result<_, _>>()?;
//! assert_eq!(flies.len(), 1);
//! assert_eq!(flies[0].get("Y"), Some(&Term::constant("tweety")));
//! # Ok::<(), kyrolog::KyroError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod certainty;
pub mod clause;
pub mod config;
pub mod conflict;
pub mod error;
pub mod substitution;
pub mod term;
pub mod unify;

// Reasoning
pub mod audit;
pub mod inference;
pub mod tms;

// IR, storage and execution
pub mod engine;
pub mod ir;
pub mod storage;

pub use engine::runtime;

// Re-export primary types at crate root for convenience
pub use audit::{AuditReport, CancellationToken};
pub use certainty::{Certainty, Provenance};
pub use clause::{ChangeKind, Clause, ClauseDraft, ClauseId, ClauseKind, ClauseStatus, StatusChange};
pub use config::EngineConfig;
pub use conflict::{Conflict, ConflictId, ConflictStatus, ConflictType};
pub use engine::{
    BatchOutcome, EngineResponse, Explanation, KnowledgeBase, KnowledgeStats, Revalidation, SupportNode, WriteBatch,
};
pub use error::{ExecutionError, KyroError, KyroResult, ValidationError};
pub use inference::{Bindings, DefaultPolicy, Materialization, Proofs, Query, QueryAnswer};
pub use storage::{ClauseStore, KnowledgeSnapshot, StoreStats};
pub use substitution::Substitution;
pub use term::{Atom, Signature, Term, Variable};
pub use tms::{Belief, BeliefId, BeliefState, BeliefStats, DerivationKind, Support};
pub use unify::{unify, unify_atoms};

// IR re-exports
pub use ir::{AssertPayload, KyroIR, Operation, QueryPayload};
