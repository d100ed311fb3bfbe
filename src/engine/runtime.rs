//! Routed execution runtime for KyroLog.
//!
//! `KnowledgeBase::execute` is synchronous. Queries must not wait behind a
//! long write batch and its audit, so this module provides a small, bounded,
//! thread-based runtime that routes requests into separate worker pools: a
//! reader pool and a single-threaded writer pool.

use std::fmt;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{EngineResponse, KnowledgeBase};
use crate::error::{ExecutionError, KyroError, KyroResult};
use crate::ir::{KyroIR, Operation};

/// Execution path selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionPath {
    /// Queries and inspection. Never takes the writer lock.
    Reader,
    /// Operations that change the clause store.
    Writer,
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reader => "reader",
            Self::Writer => "writer",
        })
    }
}

/// Routes operations to an execution path.
pub trait OperationRouter: Send + Sync {
    /// Selects the execution path for the given operation.
    fn route(&self, op: &Operation) -> ExecutionPath;
}

/// Sends `Assert` and `Audit` to the writer pool and everything else to
/// the reader pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRouter;

impl OperationRouter for DefaultRouter {
    fn route(&self, op: &Operation) -> ExecutionPath {
        if op.is_write() {
            ExecutionPath::Writer
        } else {
            ExecutionPath::Reader
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of reader workers.
    pub reader_workers: usize,
    /// Maximum queued jobs per pool.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            reader_workers: 4,
            queue_capacity: 1024,
        }
    }
}

enum Job {
    Execute {
        ir: KyroIR,
        reply: Sender<KyroResult<EngineResponse>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

struct WorkerPool {
    path: ExecutionPath,
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    fn start(path: ExecutionPath, workers: usize, queue_capacity: usize, kb: &KnowledgeBase) -> KyroResult<Self> {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let kb = kb.clone();
            let handle = thread::Builder::new()
                .name(format!("kyrolog-{path}-{idx}"))
                .spawn(move || loop {
                    match rx.recv() {
                        Ok(Job::Execute { ir, reply }) => {
                            let result = kb.execute(ir);
                            let _ = reply.send(result);
                        }
                        Err(_) => break,

                        #[cfg(test)]
                        Ok(Job::Sleep { duration, reply }) => {
                            thread::sleep(duration);
                            let _ = reply.send(());
                        }
                    }
                })
                .map_err(|e| KyroError::internal(format!("failed to spawn {path} worker: {e}")))?;
            handles.push(handle);
        }
        debug!(%path, workers, queue_capacity, "worker pool started");

        Ok(Self {
            path,
            tx,
            workers: handles,
            queue_capacity,
        })
    }

    /// A pool with no workers, left behind by `Drop`.
    fn closed(path: ExecutionPath) -> Self {
        Self {
            path,
            tx: bounded::<Job>(1).0,
            workers: Vec::new(),
            queue_capacity: 1,
        }
    }

    fn try_submit(&self, job: Job) -> KyroResult<()> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(KyroError::Execution(ExecutionError::QueueFull {
                path: self.path.to_string(),
                capacity: self.queue_capacity,
            })),
            Err(TrySendError::Disconnected(_)) => Err(KyroError::Execution(ExecutionError::Disconnected {
                path: self.path.to_string(),
            })),
        }
    }

    fn shutdown(self) {
        // Workers drain queued jobs, then see the closed channel and exit.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

/// Handle returned by `execute_async`.
pub struct ExecutionHandle {
    path: ExecutionPath,
    rx: Receiver<KyroResult<EngineResponse>>,
}

impl ExecutionHandle {
    /// Returns the path selected by the router.
    #[must_use]
    pub const fn path(&self) -> ExecutionPath {
        self.path
    }

    /// Waits for the execution to complete.
    ///
    /// # Errors
    ///
    /// Returns the operation's own error, or `Disconnected` if the worker
    /// went away without replying.
    pub fn join(self) -> KyroResult<EngineResponse> {
        let path = self.path;
        self.rx.recv().map_err(|_| {
            KyroError::Execution(ExecutionError::Disconnected {
                path: path.to_string(),
            })
        })?
    }

    /// Waits for the execution to complete with a timeout.
    ///
    /// # Errors
    ///
    /// As [`ExecutionHandle::join`], plus `Timeout` when nothing arrives in
    /// time.
    pub fn join_timeout(self, timeout: Duration) -> KyroResult<EngineResponse> {
        let path = self.path;
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => KyroError::Execution(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => KyroError::Execution(ExecutionError::Disconnected {
                path: path.to_string(),
            }),
        })?
    }
}

/// A routed runtime that keeps readers isolated from the writer.
///
/// # Examples
///
/// ```
/// use kyrolog::ir::KyroIR;
/// use kyrolog::runtime::{KyroRuntime, RuntimeConfig};
/// use kyrolog::{Atom, ClauseDraft, EngineConfig, EngineResponse, KnowledgeBase, Term};
///
/// let kb = KnowledgeBase::new(EngineConfig::default()).unwrap();
/// let runtime = KyroRuntime::new(kb, RuntimeConfig::default()).unwrap();
///
/// let bird = Atom::new("Bird", [Term::constant("tweety")]).unwrap();
/// runtime.execute(KyroIR::assert(vec![ClauseDraft::fact(bird.clone())])).unwrap();
/// let response = runtime.execute(KyroIR::query(vec![bird])).unwrap();
/// assert!(matches!(response, EngineResponse::Query { answers, .. } if answers.len() == 1));
/// ```
pub struct KyroRuntime<R: OperationRouter = DefaultRouter> {
    router: R,
    kb: KnowledgeBase,
    reader: WorkerPool,
    writer: WorkerPool,
}

impl KyroRuntime<DefaultRouter> {
    /// Create a runtime with the default router.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a worker thread cannot be spawned.
    pub fn new(kb: KnowledgeBase, config: RuntimeConfig) -> KyroResult<Self> {
        Self::with_router(kb, DefaultRouter, config)
    }
}

impl<R: OperationRouter> KyroRuntime<R> {
    /// Create a runtime with a custom router.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a worker thread cannot be spawned.
    pub fn with_router(kb: KnowledgeBase, router: R, config: RuntimeConfig) -> KyroResult<Self> {
        let reader = WorkerPool::start(ExecutionPath::Reader, config.reader_workers, config.queue_capacity, &kb)?;
        let writer = WorkerPool::start(ExecutionPath::Writer, 1, config.queue_capacity, &kb)?;
        Ok(Self {
            router,
            kb,
            reader,
            writer,
        })
    }

    fn pool(&self, path: ExecutionPath) -> &WorkerPool {
        match path {
            ExecutionPath::Reader => &self.reader,
            ExecutionPath::Writer => &self.writer,
        }
    }

    /// Execute an IR request asynchronously on the routed path.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` when the routed pool is saturated.
    pub fn execute_async(&self, ir: KyroIR) -> KyroResult<ExecutionHandle> {
        let path = self.router.route(&ir.operation);
        let (tx, rx) = bounded::<KyroResult<EngineResponse>>(1);
        self.pool(path).try_submit(Job::Execute { ir, reply: tx })?;
        Ok(ExecutionHandle { path, rx })
    }

    /// Execute an IR request synchronously on the routed path.
    ///
    /// # Errors
    ///
    /// See [`KyroRuntime::execute_async`] and [`ExecutionHandle::join`].
    pub fn execute(&self, ir: KyroIR) -> KyroResult<EngineResponse> {
        self.execute_async(ir)?.join()
    }

    /// Returns the underlying knowledge base.
    #[must_use]
    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.kb
    }

    #[cfg(test)]
    fn submit_sleep(&self, path: ExecutionPath, duration: Duration) -> KyroResult<Receiver<()>> {
        let (tx, rx) = bounded::<()>(1);
        self.pool(path).try_submit(Job::Sleep { duration, reply: tx })?;
        Ok(rx)
    }
}

impl<R: OperationRouter> Drop for KyroRuntime<R> {
    fn drop(&mut self) {
        let reader = std::mem::replace(&mut self.reader, WorkerPool::closed(ExecutionPath::Reader));
        let writer = std::mem::replace(&mut self.writer, WorkerPool::closed(ExecutionPath::Writer));
        reader.shutdown();
        writer.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::clause::ClauseDraft;
    use crate::config::EngineConfig;
    use crate::ir::HistoryPayload;
    use crate::term::{Atom, Term};
    use crate::ClauseId;

    fn bird() -> Atom {
        Atom::new("Bird", [Term::constant("tweety")]).unwrap()
    }

    fn kb_with_data() -> KnowledgeBase {
        let kb = KnowledgeBase::new(EngineConfig::default()).unwrap();
        kb.assert(ClauseDraft::fact(bird())).unwrap();
        kb
    }

    #[test]
    fn router_routes_as_expected() {
        let router = DefaultRouter;
        assert_eq!(router.route(&KyroIR::assert(vec![]).operation), ExecutionPath::Writer);
        assert_eq!(router.route(&Operation::Audit), ExecutionPath::Writer);
        assert_eq!(router.route(&KyroIR::query(vec![bird()]).operation), ExecutionPath::Reader);
        assert_eq!(router.route(&Operation::Stats), ExecutionPath::Reader);
        assert_eq!(
            router.route(&Operation::History(HistoryPayload {
                clause_id: ClauseId::from_raw(1)
            })),
            ExecutionPath::Reader
        );
    }

    #[test]
    fn writer_work_does_not_starve_readers() {
        let runtime = KyroRuntime::new(
            kb_with_data(),
            RuntimeConfig {
                reader_workers: 1,
                queue_capacity: 16,
            },
        )
        .unwrap();

        // Occupy the writer.
        let sleep = runtime
            .submit_sleep(ExecutionPath::Writer, Duration::from_millis(300))
            .unwrap();

        let started = std::time::Instant::now();
        let handle = runtime.execute_async(KyroIR::query(vec![bird()])).unwrap();
        assert_eq!(handle.path(), ExecutionPath::Reader);
        let response = handle.join_timeout(Duration::from_millis(200)).unwrap();
        assert!(matches!(response, EngineResponse::Query { answers, .. } if answers.len() == 1));
        assert!(started.elapsed() < Duration::from_millis(250));

        sleep.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn full_queue_is_reported() {
        let runtime = KyroRuntime::new(
            kb_with_data(),
            RuntimeConfig {
                reader_workers: 1,
                queue_capacity: 1,
            },
        )
        .unwrap();

        let busy = runtime
            .submit_sleep(ExecutionPath::Writer, Duration::from_millis(200))
            .unwrap();
        // The worker may not have dequeued the first job yet, so fill until
        // the queue rejects.
        let mut rejected = None;
        for _ in 0..3 {
            if let Err(err) = runtime.submit_sleep(ExecutionPath::Writer, Duration::from_millis(1)) {
                rejected = Some(err);
                break;
            }
        }
        let Some(KyroError::Execution(ExecutionError::QueueFull { path, capacity })) = rejected else {
            panic!("expected QueueFull, got {rejected:?}");
        };
        assert_eq!(path, "writer");
        assert_eq!(capacity, 1);
        busy.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn join_reports_disconnected_when_reply_sender_dropped() {
        let (tx, rx) = bounded::<KyroResult<EngineResponse>>(1);
        drop(tx);

        let handle = ExecutionHandle {
            path: ExecutionPath::Reader,
            rx,
        };

        let err = handle.join().unwrap_err();
        let KyroError::Execution(ExecutionError::Disconnected { path }) = err else {
            panic!("expected Disconnected, got {err:?}");
        };
        assert_eq!(path, "reader");
    }

    #[test]
    fn join_timeout_reports_disconnected_not_timeout_when_reply_sender_dropped() {
        let (tx, rx) = bounded::<KyroResult<EngineResponse>>(1);
        drop(tx);

        let handle = ExecutionHandle {
            path: ExecutionPath::Writer,
            rx,
        };

        let err = handle.join_timeout(Duration::from_millis(10)).unwrap_err();
        let KyroError::Execution(ExecutionError::Disconnected { path }) = err else {
            panic!("expected Disconnected, got {err:?}");
        };
        assert_eq!(path, "writer");
    }
}
