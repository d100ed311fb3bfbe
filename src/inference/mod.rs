//! Inference layer: SLD resolution, default reasoning and query evaluation.
//!
//! Classical resolution and default reasoning are separate components; the
//! query composes them (classical first, defaults as a fallback) instead of
//! dispatching between them dynamically.

mod defaults;
mod forward;
mod policies;
mod query;
mod resolver;
mod search;

use std::sync::{Arc, Mutex};

pub use policies::DefaultPolicy;
pub use query::{Bindings, Proofs, Query, QueryAnswer};
pub use resolver::{apply_default_policy, Candidate, PolicyDecision};

pub(crate) use defaults::DefaultReasoner;
pub(crate) use forward::materialize;
pub use forward::Materialization;
pub(crate) use query::QueryMode;
pub(crate) use search::{Freshener, ProofSearch, SearchLimits, Solution};

use crate::config::EngineConfig;
use crate::error::{KyroError, KyroResult};
use crate::storage::ClauseStore;
use crate::substitution::Substitution;
use crate::term::Atom;
use crate::tms::TruthMaintenance;

/// Everything one reasoning task needs: a store snapshot, the shared
/// justification graph and the limits in force.
#[derive(Debug, Clone)]
pub(crate) struct Context {
    pub store: Arc<ClauseStore>,
    pub tms: Arc<Mutex<TruthMaintenance>>,
    pub limits: SearchLimits,
    pub policy: DefaultPolicy,
    pub fresh: Freshener,
}

impl Context {
    pub(crate) fn new(store: Arc<ClauseStore>, tms: Arc<Mutex<TruthMaintenance>>, config: &EngineConfig) -> Self {
        Self {
            store,
            tms,
            limits: SearchLimits::from(config),
            policy: config.default_policy,
            fresh: Freshener::default(),
        }
    }

    /// Runs `f` inside a short critical section on the justification graph.
    pub(crate) fn with_tms<R>(&self, f: impl FnOnce(&mut TruthMaintenance) -> KyroResult<R>) -> KyroResult<R> {
        let mut guard = self
            .tms
            .lock()
            .map_err(|_| KyroError::storage("poisoned lock: truth maintenance"))?;
        f(&mut guard)
    }

    pub(crate) fn search(&self, goals: &[Atom], subst: Substitution) -> ProofSearch {
        ProofSearch::new(Arc::clone(&self.store), goals, subst, self.limits, self.fresh.clone())
    }

    /// True if `atom` has at least one classical proof. A search cut by the
    /// depth guard counts as proved when `cutoff_counts` is set.
    pub(crate) fn provable(&self, atom: &Atom, cutoff_counts: bool) -> bool {
        let mut search = self.search(std::slice::from_ref(atom), Substitution::new());
        search.next_solution().is_some() || (cutoff_counts && search.cutoff().is_some())
    }
}
