//! The knowledge base: clause store, justification graph and every
//! operation over them.
//!
//! Reads never block writes for long. The clause store is published as an
//! immutable `Arc` snapshot; a reader clones the `Arc` and reasons over it
//! without holding any lock. Writers are serialized by a single writer
//! mutex: a write copies the current snapshot, applies the change, logs it,
//! and swaps the new snapshot in. Justification graph updates happen after
//! the swap, under the graph's own short-lived mutex.

mod explain;
mod write_path;

/// Worker-pool runtime that keeps queries from queueing behind writes.
pub mod runtime;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audit::{AuditReport, Auditor, CancellationToken};
use crate::clause::{Clause, ClauseDraft, ClauseId, StatusChange};
use crate::config::EngineConfig;
use crate::conflict::{Conflict, ConflictId};
use crate::error::{ExecutionError, KyroError, KyroResult};
use crate::inference::{
    materialize, Bindings, Context, DefaultReasoner, Materialization, Proofs, Query, QueryAnswer, QueryMode,
};
use crate::ir::{validate_clauses, validate_goals, KyroIR, Operation};
use crate::storage::{ClauseStore, KnowledgeSnapshot, RetractOutcome, StoreStats};
use crate::substitution::Substitution;
use crate::term::Atom;
use crate::tms::{Belief, BeliefId, BeliefState, BeliefStats, DerivationKind, TruthMaintenance};

#[cfg(feature = "persistent")]
use crate::storage::persistent::{Journal, PersistentConfig, WalEntryKind};

pub use explain::{Explanation, SupportNode};
pub use write_path::{BatchOutcome, WriteBatch};

fn poisoned(what: &str) -> KyroError {
    KyroError::storage(format!("poisoned lock: {what}"))
}

/// Result of executing a KyroLog operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EngineResponse {
    /// Result of an ASSERT batch.
    Assert(BatchOutcome),

    /// Result of a QUERY.
    Query {
        /// Answers in search order.
        answers: Vec<QueryAnswer>,
        /// The goal the depth guard cut, if the answers may be incomplete.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        depth_exceeded: Option<String>,
    },

    /// Result of an AUDIT.
    Audit(AuditReport),

    /// Result of a HISTORY lookup.
    History { changes: Vec<StatusChange> },

    /// Result of an EXPLAIN lookup. `None` for an unknown belief.
    Explain { explanation: Option<Explanation> },

    /// Result of a forward-chaining pass.
    Materialize(Materialization),

    /// Result of a STATS request.
    Stats(KnowledgeStats),
}

/// Counts across the whole knowledge base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeStats {
    /// Clause counts by kind and status.
    pub clauses: StoreStats,
    /// Belief counts by state.
    pub beliefs: BeliefStats,
    /// Conflicts recorded by every audit so far.
    pub conflicts: usize,
    /// Recorded conflicts left unresolved.
    pub unresolved_conflicts: usize,
}

/// Outcome of `KnowledgeBase::revalidate_orphans`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revalidation {
    /// Orphans that found a new sound derivation.
    pub resupported: Vec<BeliefId>,
    /// Orphans with no remaining derivation.
    pub invalidated: Vec<BeliefId>,
}

/// What a retraction changed.
#[derive(Debug, Default)]
pub(crate) struct Retraction {
    pub retracted: Vec<ClauseId>,
    pub orphaned: Vec<BeliefId>,
    /// Ids that were unknown or already retracted.
    pub skipped: Vec<ClauseId>,
}

/// State owned by whoever holds the writer lock.
#[derive(Debug, Default)]
pub(crate) struct Writer {
    conflicts: Vec<Conflict>,
    #[cfg(feature = "persistent")]
    journal: Option<Journal>,
}

impl Writer {
    #[cfg(feature = "persistent")]
    fn log_assert(&mut self, drafts: &[ClauseDraft], ids: &[ClauseId], at: DateTime<Utc>) -> KyroResult<()> {
        if let Some(journal) = self.journal.as_mut() {
            journal.append(
                WalEntryKind::Assert {
                    clauses: drafts.to_vec(),
                    ids: ids.to_vec(),
                },
                at,
            )?;
        }
        Ok(())
    }

    #[cfg(not(feature = "persistent"))]
    fn log_assert(&mut self, _drafts: &[ClauseDraft], _ids: &[ClauseId], _at: DateTime<Utc>) -> KyroResult<()> {
        Ok(())
    }

    #[cfg(feature = "persistent")]
    fn log_retract(
        &mut self,
        ids: &[ClauseId],
        reason: &str,
        conflict_id: Option<ConflictId>,
        at: DateTime<Utc>,
    ) -> KyroResult<()> {
        if let Some(journal) = self.journal.as_mut() {
            journal.append(
                WalEntryKind::Retract {
                    ids: ids.to_vec(),
                    reason: reason.to_string(),
                    conflict_id,
                },
                at,
            )?;
        }
        Ok(())
    }

    #[cfg(not(feature = "persistent"))]
    fn log_retract(
        &mut self,
        _ids: &[ClauseId],
        _reason: &str,
        _conflict_id: Option<ConflictId>,
        _at: DateTime<Utc>,
    ) -> KyroResult<()> {
        Ok(())
    }
}

struct Shared {
    config: EngineConfig,
    store: RwLock<Arc<ClauseStore>>,
    tms: Arc<Mutex<TruthMaintenance>>,
    writer: Mutex<Writer>,
}

/// A knowledge base of facts, rules and default rules with a justification
/// graph over everything derived from them.
///
/// Cloning is cheap and every clone shares the same state, so a
/// `KnowledgeBase` can be handed to as many threads as needed.
///
/// # Examples
///
/// ```
/// use kyrolog::{Atom, EngineConfig, KnowledgeBase, Term};
///
/// let kb = KnowledgeBase::new(EngineConfig::default()).unwrap();
/// let human = |t: Term| Atom::new("Human", [t]).unwrap();
/// let mortal = |t: Term| Atom::new("Mortal", [t]).unwrap();
///
/// kb.assert_fact(human(Term::constant("socrates")), None, 1.0).unwrap();
/// kb.assert_rule(vec![human(Term::var("X"))], mortal(Term::var("X")), None, 1.0).unwrap();
///
/// let answers: Vec<_> = kb.query(vec![mortal(Term::var("Y"))]).unwrap().collect();
/// assert_eq!(answers.len(), 1);
/// let answer = answers[0].as_ref().unwrap();
/// assert_eq!(answer.get("Y"), Some(&Term::constant("socrates")));
/// ```
#[derive(Clone)]
pub struct KnowledgeBase {
    shared: Arc<Shared>,
}

impl fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl KnowledgeBase {
    /// Creates an empty in-memory knowledge base.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration fails validation.
    pub fn new(config: EngineConfig) -> KyroResult<Self> {
        let config = config.validate()?;
        Ok(Self::from_parts(config, ClauseStore::new(), Writer::default()))
    }

    /// Opens a knowledge base backed by a write-ahead log in `dir`, replaying
    /// whatever the log already holds. Beliefs are not persisted; they are
    /// re-derived on demand.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, when another process holds the
    /// directory lock, or when the log cannot be replayed.
    #[cfg(feature = "persistent")]
    pub fn open(
        dir: impl AsRef<std::path::Path>,
        config: EngineConfig,
        persistent: &PersistentConfig,
    ) -> KyroResult<Self> {
        let config = config.validate()?;
        let (journal, store) = Journal::open(dir.as_ref(), persistent)?;
        let writer = Writer {
            conflicts: Vec::new(),
            journal: Some(journal),
        };
        Ok(Self::from_parts(config, store, writer))
    }

    /// Creates an in-memory knowledge base from an exported snapshot.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or a snapshot that does not verify.
    pub fn import(snapshot: &KnowledgeSnapshot, config: EngineConfig) -> KyroResult<Self> {
        let config = config.validate()?;
        let store = snapshot.restore()?;
        info!(clauses = store.len(), "knowledge base imported");
        Ok(Self::from_parts(config, store, Writer::default()))
    }

    fn from_parts(config: EngineConfig, store: ClauseStore, writer: Writer) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                store: RwLock::new(Arc::new(store)),
                tms: Arc::new(Mutex::new(TruthMaintenance::new())),
                writer: Mutex::new(writer),
            }),
        }
    }

    /// The configuration this knowledge base was opened with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// The current clause store. The snapshot never changes; later writes
    /// publish a new one.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store lock is poisoned.
    pub fn snapshot(&self) -> KyroResult<Arc<ClauseStore>> {
        let guard = self.shared.store.read().map_err(|_| poisoned("clause store"))?;
        Ok(Arc::clone(&guard))
    }

    pub(crate) fn context(&self) -> KyroResult<Context> {
        Ok(Context::new(
            self.snapshot()?,
            Arc::clone(&self.shared.tms),
            &self.shared.config,
        ))
    }

    fn publish(&self, store: ClauseStore) -> KyroResult<()> {
        let mut guard = self.shared.store.write().map_err(|_| poisoned("clause store"))?;
        *guard = Arc::new(store);
        Ok(())
    }

    fn lock_writer(&self) -> KyroResult<MutexGuard<'_, Writer>> {
        self.shared.writer.lock().map_err(|_| poisoned("writer"))
    }

    fn lock_tms(&self) -> KyroResult<MutexGuard<'_, TruthMaintenance>> {
        self.shared.tms.lock().map_err(|_| poisoned("truth maintenance"))
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Asserts a single clause.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed clause, or a storage error
    /// if the write-ahead log rejects the write.
    pub fn assert(&self, draft: ClauseDraft) -> KyroResult<ClauseId> {
        let outcome = self.submit(vec![draft])?;
        outcome
            .ids
            .first()
            .copied()
            .ok_or_else(|| KyroError::internal("write batch returned no id"))
    }

    /// Asserts a ground fact.
    ///
    /// # Errors
    ///
    /// See [`KnowledgeBase::assert`].
    pub fn assert_fact(&self, atom: Atom, provenance: Option<&str>, certainty: f32) -> KyroResult<ClauseId> {
        self.assert(write_path::tagged(ClauseDraft::fact(atom), provenance, certainty)?)
    }

    /// Asserts `body ⟹ head`.
    ///
    /// # Errors
    ///
    /// See [`KnowledgeBase::assert`].
    pub fn assert_rule(
        &self,
        body: Vec<Atom>,
        head: Atom,
        provenance: Option<&str>,
        certainty: f32,
    ) -> KyroResult<ClauseId> {
        self.assert(write_path::tagged(ClauseDraft::rule(body, head), provenance, certainty)?)
    }

    /// Asserts `prerequisites : justifications ⇝ consequent`.
    ///
    /// # Errors
    ///
    /// See [`KnowledgeBase::assert`].
    pub fn assert_default(
        &self,
        prerequisites: Vec<Atom>,
        justifications: Vec<Atom>,
        consequent: Atom,
        provenance: Option<&str>,
        certainty: f32,
    ) -> KyroResult<ClauseId> {
        self.assert(write_path::tagged(
            ClauseDraft::default_rule(prerequisites, justifications, consequent),
            provenance,
            certainty,
        )?)
    }

    /// Builds and applies a write batch atomically.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by `build` or by the batch itself.
    /// Nothing is applied on error.
    pub fn batch(&self, build: impl FnOnce(&mut WriteBatch) -> KyroResult<()>) -> KyroResult<BatchOutcome> {
        let mut batch = WriteBatch::new();
        build(&mut batch)?;
        self.submit(batch.into_drafts())
    }

    /// Applies `drafts` as one atomic batch, then audits if
    /// `audit_after_write` is set.
    ///
    /// # Errors
    ///
    /// Returns a validation error for the first malformed clause, in which
    /// case nothing is applied.
    pub fn submit(&self, drafts: Vec<ClauseDraft>) -> KyroResult<BatchOutcome> {
        if drafts.is_empty() {
            return Ok(BatchOutcome::default());
        }
        validate_clauses(&drafts)?;
        let mut writer = self.lock_writer()?;
        let at = Utc::now();

        let mut next = ClauseStore::clone(&*self.snapshot()?);
        let mut ids = Vec::with_capacity(drafts.len());
        let mut inserted = 0usize;
        for draft in &drafts {
            let outcome = next.assert_at(draft.clone(), at)?;
            if outcome.is_new() {
                inserted += 1;
            }
            ids.push(outcome.id());
        }
        writer.log_assert(&drafts, &ids, at)?;
        self.publish(next)?;
        info!(clauses = drafts.len(), inserted, "write batch applied");

        let conflicts = if self.shared.config.audit_after_write {
            self.audit_locked(&mut writer, &CancellationToken::new())?.conflicts
        } else {
            Vec::new()
        };
        Ok(BatchOutcome { ids, conflicts })
    }

    /// Retracts clauses on behalf of the auditor. Unknown and already
    /// retracted ids are reported in `skipped`.
    pub(crate) fn retract_locked(
        &self,
        writer: &mut Writer,
        ids: &[ClauseId],
        reason: &str,
        conflict_id: Option<ConflictId>,
    ) -> KyroResult<Retraction> {
        let at = Utc::now();
        let mut next = ClauseStore::clone(&*self.snapshot()?);
        let mut out = Retraction::default();
        for id in ids {
            match next.retract_at(*id, reason, conflict_id, at) {
                RetractOutcome::Retracted(_) => out.retracted.push(*id),
                RetractOutcome::AlreadyRetracted | RetractOutcome::Unknown => out.skipped.push(*id),
            }
        }
        if out.retracted.is_empty() {
            return Ok(out);
        }

        writer.log_retract(&out.retracted, reason, conflict_id, at)?;
        self.publish(next)?;

        let mut tms = self.lock_tms()?;
        for id in &out.retracted {
            out.orphaned.extend(tms.on_clause_retracted(*id)?);
        }
        info!(
            retracted = out.retracted.len(),
            orphaned = out.orphaned.len(),
            reason,
            "clauses retracted"
        );
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------

    /// Runs the consistency auditor to completion.
    ///
    /// # Errors
    ///
    /// Returns a storage error on a poisoned lock or a failed log write, and
    /// `GraphCorruption` if the justification graph is damaged.
    pub fn audit(&self) -> KyroResult<AuditReport> {
        self.audit_with(&CancellationToken::new())
    }

    /// Runs the consistency auditor, stopping between conflicts once `token`
    /// is cancelled. Conflicts already resolved stay resolved.
    ///
    /// # Errors
    ///
    /// See [`KnowledgeBase::audit`].
    pub fn audit_with(&self, token: &CancellationToken) -> KyroResult<AuditReport> {
        let mut writer = self.lock_writer()?;
        self.audit_locked(&mut writer, token)
    }

    fn audit_locked(&self, writer: &mut Writer, token: &CancellationToken) -> KyroResult<AuditReport> {
        let report = Auditor::new(self, writer, token).run()?;
        writer.conflicts.extend(report.conflicts.iter().cloned());
        Ok(report)
    }

    /// Every conflict any audit has recorded, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the writer lock is poisoned.
    pub fn conflict_log(&self) -> KyroResult<Vec<Conflict>> {
        Ok(self.lock_writer()?.conflicts.clone())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    fn start_query(&self, goals: Vec<Atom>, mode: QueryMode) -> KyroResult<Query> {
        validate_goals(&goals)?;
        let ctx = self.context()?;
        debug!(goals = goals.len(), ?mode, "query started");
        Ok(Query::new(self.clone(), ctx, goals, mode))
    }

    /// Proves a conjunction of goals, classically first and through default
    /// rules when no classical proof exists.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty or malformed conjunction.
    /// Search errors are reported through the returned stream.
    pub fn query(&self, goals: Vec<Atom>) -> KyroResult<Query> {
        self.start_query(goals, QueryMode::WithDefaults)
    }

    /// Classical proofs of a single goal. Default rules are not used.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed goal.
    pub fn prove(&self, goal: Atom) -> KyroResult<Proofs> {
        Ok(Proofs::new(self.start_query(vec![goal], QueryMode::Classical)?))
    }

    /// Classical bindings for a conjunction of goals.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty or malformed conjunction.
    pub fn prove_all(&self, goals: Vec<Atom>) -> KyroResult<Bindings> {
        Ok(Bindings::new(self.start_query(goals, QueryMode::Classical)?))
    }

    /// Derives `goal` through default rules only, returning the first
    /// surviving default belief.
    ///
    /// # Errors
    ///
    /// Returns `DepthExceeded` when nothing was derived and a prerequisite
    /// search was cut by the depth guard.
    pub fn prove_default(&self, goal: Atom) -> KyroResult<Option<Belief>> {
        validate_goals(std::slice::from_ref(&goal))?;
        let ctx = self.context()?;
        let derived = DefaultReasoner::new(&ctx).derive(&goal)?;
        match derived.beliefs.first() {
            Some((_, id)) => ctx.with_tms(|tms| Ok(tms.get(*id).cloned())),
            None => match derived.cutoff {
                Some(goal) => Err(ExecutionError::DepthExceeded {
                    goal,
                    limit: self.shared.config.max_depth,
                }
                .into()),
                None => Ok(None),
            },
        }
    }

    /// Records every ground conclusion of every active rule as a belief.
    ///
    /// # Errors
    ///
    /// Returns a storage error on a poisoned lock.
    pub fn materialize(&self) -> KyroResult<Materialization> {
        materialize(&self.context()?)
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// A clause by id, including retracted ones.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store lock is poisoned.
    pub fn clause(&self, id: ClauseId) -> KyroResult<Option<Clause>> {
        Ok(self.snapshot()?.get(id).cloned())
    }

    /// Status changes of a clause, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store lock is poisoned.
    pub fn history(&self, id: ClauseId) -> KyroResult<Vec<StatusChange>> {
        Ok(self.snapshot()?.history(id).to_vec())
    }

    /// # Errors
    ///
    /// Returns a storage error if the graph lock is poisoned.
    pub fn belief(&self, id: BeliefId) -> KyroResult<Option<Belief>> {
        Ok(self.lock_tms()?.get(id).cloned())
    }

    /// The full justification tree of a belief.
    ///
    /// # Errors
    ///
    /// Returns `GraphCorruption` if an edge points at a missing node.
    pub fn explain(&self, id: BeliefId) -> KyroResult<Option<Explanation>> {
        let store = self.snapshot()?;
        let tms = self.lock_tms()?;
        explain::explain(&tms, &store, id)
    }

    /// # Errors
    ///
    /// Returns a storage error on a poisoned lock.
    pub fn stats(&self) -> KyroResult<KnowledgeStats> {
        let clauses = self.snapshot()?.stats();
        let beliefs = self.lock_tms()?.stats();
        let writer = self.lock_writer()?;
        Ok(KnowledgeStats {
            clauses,
            beliefs,
            conflicts: writer.conflicts.len(),
            unresolved_conflicts: writer.conflicts.iter().filter(|c| !c.is_resolved()).count(),
        })
    }

    /// Content fingerprint of the clause store.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store cannot be serialized.
    pub fn fingerprint(&self) -> KyroResult<String> {
        self.snapshot()?.fingerprint()
    }

    /// Verifies that the justification graph is acyclic and has no dangling
    /// edges.
    ///
    /// # Errors
    ///
    /// Returns `GraphCorruption` with a dump of the graph.
    pub fn check_integrity(&self) -> KyroResult<()> {
        let store = self.snapshot()?;
        self.lock_tms()?.check_integrity(&store)
    }

    /// Exports every clause and its history.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store cannot be serialized.
    pub fn export(&self) -> KyroResult<KnowledgeSnapshot> {
        KnowledgeSnapshot::capture(&*self.snapshot()?)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Re-proves every orphaned belief. Orphans with a new sound derivation
    /// become supported again; the rest are invalidated.
    ///
    /// # Errors
    ///
    /// Returns `GraphCorruption` if the graph is damaged.
    pub fn revalidate_orphans(&self) -> KyroResult<Revalidation> {
        let _writer = self.lock_writer()?;
        let ctx = self.context()?;
        let orphans = ctx.with_tms(|tms| Ok(tms.orphans()))?;
        let mut out = Revalidation::default();

        for id in orphans {
            let Some((atom, kind, state)) = ctx.with_tms(|tms| Ok(tms.get(id).map(|b| (b.atom.clone(), b.kind, b.state))))?
            else {
                continue;
            };
            match state {
                BeliefState::Supported => {
                    out.resupported.push(id);
                    continue;
                }
                BeliefState::Invalidated => continue,
                BeliefState::Orphaned => {}
            }
            if atom.is_ground() {
                Self::rederive(&ctx, &atom, kind)?;
            }
            if ctx.with_tms(|tms| Ok(tms.get(id).is_some_and(Belief::is_supported)))? {
                out.resupported.push(id);
            } else {
                ctx.with_tms(|tms| tms.invalidate(id))?;
                out.invalidated.push(id);
            }
        }

        info!(
            resupported = out.resupported.len(),
            invalidated = out.invalidated.len(),
            "orphans revalidated"
        );
        Ok(out)
    }

    fn rederive(ctx: &Context, atom: &Atom, kind: DerivationKind) -> KyroResult<()> {
        match kind {
            DerivationKind::Classical => {
                let mut search = ctx.search(std::slice::from_ref(atom), Substitution::new());
                if let Some(solution) = search.next_solution() {
                    let store = &ctx.store;
                    ctx.with_tms(|tms| {
                        for proof in &solution.proofs {
                            proof.record(&solution.subst, tms, store)?;
                        }
                        Ok(())
                    })?;
                }
            }
            DerivationKind::Default => {
                DefaultReasoner::new(ctx).derive(atom)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // IR
    // ------------------------------------------------------------------

    /// Executes a KyroLog IR request.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed request, and otherwise
    /// whatever the operation itself returns. A query cut by the depth guard
    /// is not an error here; it sets `depth_exceeded` instead.
    pub fn execute(&self, ir: KyroIR) -> KyroResult<EngineResponse> {
        // Deserialized requests have not passed through any builder.
        ir.validate()?;
        debug!(request_id = %ir.request_id, op = ir.operation.name(), "executing");

        match ir.operation {
            Operation::Assert(payload) => Ok(EngineResponse::Assert(self.submit(payload.clauses)?)),
            Operation::Query(payload) => {
                let mode = if payload.classical_only {
                    QueryMode::Classical
                } else {
                    QueryMode::WithDefaults
                };
                let query = self.start_query(payload.goals, mode)?;
                let mut answers = Vec::new();
                let mut depth_exceeded = None;
                for item in query.take(payload.limit.unwrap_or(usize::MAX)) {
                    match item {
                        Ok(answer) => answers.push(answer),
                        Err(KyroError::Execution(ExecutionError::DepthExceeded { goal, .. })) => {
                            depth_exceeded = Some(goal);
                        }
                        Err(err) => return Err(err),
                    }
                }
                Ok(EngineResponse::Query {
                    answers,
                    depth_exceeded,
                })
            }
            Operation::Audit => Ok(EngineResponse::Audit(self.audit()?)),
            Operation::History(payload) => Ok(EngineResponse::History {
                changes: self.history(payload.clause_id)?,
            }),
            Operation::Explain(payload) => Ok(EngineResponse::Explain {
                explanation: self.explain(payload.belief_id)?,
            }),
            Operation::Materialize => Ok(EngineResponse::Materialize(self.materialize()?)),
            Operation::Stats => Ok(EngineResponse::Stats(self.stats()?)),
        }
    }
}
