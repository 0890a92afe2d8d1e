//! Memoized, single-flight cell compilation.
//!
//! # Keys
//!
//! A compilation is valid for a cell when it was produced from the cell's
//! current buffer version, under the requested environment fingerprint, with
//! the current predecessor compilations as context. Only the latest entry per
//! cell is kept; older ones live on only in callers that still hold an `Arc`.
//!
//! # Single flight
//!
//! In-flight compiles are `Shared` futures. The table holds only a weak
//! handle, so the compile is owned by the callers awaiting it:
//!
//! ```text
//! caller A ──┐
//!            ├── Shared<compile future> ── backend.compile(token)
//! caller B ──┘          │
//!                       └── DropGuard(token)
//! ```
//!
//! A request for a cell that is already compiling under a different key (say,
//! another environment) waits for that compile to finish before starting its
//! own, so a cell never has two backend compiles running at once.
//!
//! A caller that cancels drops its clone and detaches. When the last clone is
//! dropped the compile future is dropped with it, and its drop guard cancels
//! the token handed to the backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, WeakShared};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::backend::{BackendOutput, CompileRequest, CompilerBackend};
use super::types::{Compilation, EvaluationEnvironment, context_stamp};
use crate::cells::CellId;
use crate::error::{Error, Result};
use crate::workspace::{SharedState, WorkspaceConfiguration, WorkspaceEvent};

type CompileOutcome<A> = Result<Arc<Compilation<A>>>;
type CompileFuture<A> = BoxFuture<'static, CompileOutcome<A>>;

/// Latest compilation per cell.
pub struct MemoTable<A> {
    entries: FxHashMap<CellId, Arc<Compilation<A>>>,
}

impl<A> MemoTable<A> {
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
        }
    }

    pub fn get(&self, id: CellId) -> Option<&Arc<Compilation<A>>> {
        self.entries.get(&id)
    }

    /// Store a compilation, returning the entry it supersedes.
    pub fn insert(&mut self, compilation: Arc<Compilation<A>>) -> Option<Arc<Compilation<A>>> {
        self.entries.insert(compilation.cell_id, compilation)
    }

    /// Drop a cell's entry.
    pub fn evict(&mut self, id: CellId) -> Option<Arc<Compilation<A>>> {
        self.entries.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<A> Default for MemoTable<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// What an in-flight compile was started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FlightKey {
    version: u64,
    environment: u64,
    context: u64,
}

struct Flight<A> {
    key: FlightKey,
    future: WeakShared<CompileFuture<A>>,
    cancel: CancellationToken,
}

/// A cell as seen when a compile request began.
struct CellSnapshot<A> {
    id: CellId,
    buffer: Arc<str>,
    version: u64,
    epoch: u64,
    flagged: bool,
    cached: Option<Arc<Compilation<A>>>,
}

impl<A> Clone for CellSnapshot<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            buffer: Arc::clone(&self.buffer),
            version: self.version,
            epoch: self.epoch,
            flagged: self.flagged,
            cached: self.cached.clone(),
        }
    }
}

/// Outcome of looking up the in-flight table for a cell.
enum Slot<A> {
    /// A compile for the requested key, joined or newly started
    Joined(Shared<CompileFuture<A>>),
    /// The cell is compiling under a different key
    Busy(Shared<CompileFuture<A>>),
}

/// Memoizes backend compilations per cell, with at most one compile in flight
/// per cell.
pub struct CompilationCache<B: CompilerBackend> {
    state: SharedState<B::Artifact>,
    backend: Arc<B>,
    configuration: Arc<WorkspaceConfiguration>,
    inflight: Mutex<FxHashMap<CellId, Flight<B::Artifact>>>,
    generations: AtomicU64,
    events: broadcast::Sender<WorkspaceEvent>,
    root: CancellationToken,
}

impl<B: CompilerBackend> CompilationCache<B> {
    pub(crate) fn new(
        state: SharedState<B::Artifact>,
        backend: Arc<B>,
        configuration: Arc<WorkspaceConfiguration>,
        events: broadcast::Sender<WorkspaceEvent>,
        root: CancellationToken,
    ) -> Self {
        Self {
            state,
            backend,
            configuration,
            inflight: Mutex::new(FxHashMap::default()),
            generations: AtomicU64::new(0),
            events,
            root,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Get a current compilation of `cell_id`, compiling if needed.
    ///
    /// Outdated predecessors are compiled first, in order, so the cell is
    /// compiled against a fully current context and is fresh afterwards
    /// (unless an edit raced the compile). The chain is snapshotted when the
    /// call begins; later edits do not change what this call compiles.
    pub async fn get_cell_compilation(
        self: &Arc<Self>,
        cell_id: CellId,
        environment: &EvaluationEnvironment,
        cancel: &CancellationToken,
    ) -> Result<Arc<Compilation<B::Artifact>>> {
        if self.root.is_cancelled() {
            return Err(Error::Disposed);
        }

        let chain = self.snapshot_chain(cell_id)?;
        let fingerprint = environment.fingerprint();

        let mut context: Vec<Arc<Compilation<B::Artifact>>> = Vec::with_capacity(chain.len());
        for cell in chain {
            let compilation = self
                .ensure(cell, environment, fingerprint, &context, cancel)
                .await?;
            context.push(compilation);
        }

        context.pop().ok_or(Error::NotFound(cell_id))
    }

    /// Cancel in-flight compiles for cells that were just invalidated.
    ///
    /// Callers attached to them observe [`Error::Cancelled`].
    pub(crate) fn cancel_flights(&self, ids: &[CellId]) {
        let mut inflight = self.inflight.lock();
        for id in ids {
            if let Some(flight) = inflight.remove(id) {
                tracing::trace!(cell = %id, "cancelling superseded compilation");
                flight.cancel.cancel();
            }
        }
    }

    /// Cancel every in-flight compile.
    pub(crate) fn cancel_all(&self) {
        for (_, flight) in self.inflight.lock().drain() {
            flight.cancel.cancel();
        }
    }

    /// Number of compiles currently joinable.
    pub fn in_flight(&self) -> usize {
        self.inflight
            .lock()
            .values()
            .filter(|flight| flight.future.upgrade().is_some())
            .count()
    }

    /// Capture the target cell and its dependencies under one read lock.
    fn snapshot_chain(&self, cell_id: CellId) -> Result<Vec<CellSnapshot<B::Artifact>>> {
        let state = self.state.read();
        let mut ids = state.topology.dependencies(&state.cells, cell_id)?;
        ids.push(cell_id);

        ids.into_iter()
            .map(|id| -> Result<CellSnapshot<B::Artifact>> {
                let cell = state.cells.get(id)?;
                Ok(CellSnapshot {
                    id,
                    buffer: Arc::from(cell.buffer.as_str()),
                    version: cell.version,
                    epoch: state.staleness.epoch(id)?,
                    flagged: state.staleness.is_flagged(id),
                    cached: state.memo.get(id).cloned(),
                })
            })
            .collect()
    }

    /// Return a valid memoized compilation for one cell, or compile it.
    async fn ensure(
        self: &Arc<Self>,
        cell: CellSnapshot<B::Artifact>,
        environment: &EvaluationEnvironment,
        fingerprint: u64,
        context: &[Arc<Compilation<B::Artifact>>],
        cancel: &CancellationToken,
    ) -> Result<Arc<Compilation<B::Artifact>>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let key = FlightKey {
            version: cell.version,
            environment: fingerprint,
            context: context_stamp(context),
        };

        if let Some(cached) = cell.cached.as_ref().filter(|c| {
            c.version == key.version
                && c.environment_fingerprint == key.environment
                && c.context_stamp == key.context
        }) {
            tracing::trace!(cell = %cell.id, version = cell.version, "compilation cache hit");
            if cell.flagged {
                self.state.write().staleness.mark_fresh(cell.id, cell.epoch);
            }
            return Ok(Arc::clone(cached));
        }

        let id = cell.id;
        let flight = loop {
            match self.join_or_start(&cell, environment, key, context) {
                Slot::Joined(flight) => break flight,
                Slot::Busy(running) => {
                    tracing::trace!(cell = %id, version = key.version, "waiting for compilation under another key");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = running => {}
                    }
                    // An edit while waiting supersedes this request.
                    if self.state.read().cells.cell_version(id).ok() != Some(key.version) {
                        return Err(Error::Cancelled);
                    }
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::trace!(cell = %id, "caller detached from compilation");
                Err(Error::Cancelled)
            }
            outcome = flight => outcome,
        }
    }

    /// Attach to the in-flight compile for `key`, or start a new one.
    ///
    /// At most one compile runs per cell. If the cell is already compiling
    /// under another key, the running flight is returned as [`Slot::Busy`]
    /// and nothing is started.
    fn join_or_start(
        self: &Arc<Self>,
        cell: &CellSnapshot<B::Artifact>,
        environment: &EvaluationEnvironment,
        key: FlightKey,
        context: &[Arc<Compilation<B::Artifact>>],
    ) -> Slot<B::Artifact> {
        let mut inflight = self.inflight.lock();

        let running = inflight
            .get(&cell.id)
            .and_then(|flight| flight.future.upgrade().map(|shared| (flight.key, shared)));
        match running {
            Some((running_key, shared)) if running_key == key => {
                tracing::trace!(cell = %cell.id, version = key.version, "attached to in-flight compilation");
                return Slot::Joined(shared);
            }
            Some((_, shared)) => return Slot::Busy(shared),
            None => {}
        }

        let id = cell.id;
        let token = self.root.child_token();
        let future = Arc::clone(self)
            .run_compile(cell.clone(), environment.clone(), key, context.to_vec(), token.clone())
            .boxed()
            .shared();

        if let Some(weak) = future.downgrade() {
            inflight.insert(
                id,
                Flight {
                    key,
                    future: weak,
                    cancel: token,
                },
            );
        }
        Slot::Joined(future)
    }

    /// Body of an in-flight compile, shared by every attached caller.
    async fn run_compile(
        self: Arc<Self>,
        cell: CellSnapshot<B::Artifact>,
        environment: EvaluationEnvironment,
        key: FlightKey,
        context: Vec<Arc<Compilation<B::Artifact>>>,
        token: CancellationToken,
    ) -> CompileOutcome<B::Artifact> {
        // Abandoning this future (last caller detached) cancels the backend.
        let _guard = token.clone().drop_guard();

        tracing::debug!(cell = %cell.id, version = cell.version, context = context.len(), "compiling cell");

        let request = CompileRequest {
            cell_id: cell.id,
            buffer: &cell.buffer,
            context: &context,
            environment: &environment,
            configuration: &self.configuration,
        };

        let output = if token.is_cancelled() {
            None
        } else {
            tokio::select! {
                biased;
                _ = token.cancelled() => None,
                output = self.backend.compile(request, token.clone()) => Some(output),
            }
        };

        let outcome = match output {
            None => Err(Error::Cancelled),
            Some(_) if token.is_cancelled() => Err(Error::Cancelled),
            Some(Ok(output)) => Ok(self.store(&cell, key, output)),
            Some(Err(failure)) => {
                tracing::warn!(cell = %cell.id, "compiler backend failed: {}", failure.message);
                Err(Error::CompilationBackend {
                    cell_id: cell.id,
                    message: failure.message,
                    diagnostics: failure.diagnostics,
                })
            }
        };

        if matches!(outcome, Err(Error::Cancelled)) {
            tracing::debug!(cell = %cell.id, "compilation cancelled");
        }

        self.finish_flight(cell.id, key);
        outcome
    }

    /// Memoize a backend result if the cell still has the compiled version.
    fn store(
        &self,
        cell: &CellSnapshot<B::Artifact>,
        key: FlightKey,
        output: BackendOutput<B::Artifact>,
    ) -> Arc<Compilation<B::Artifact>> {
        let compilation = Arc::new(Compilation {
            cell_id: cell.id,
            version: cell.version,
            generation: self.generations.fetch_add(1, Ordering::Relaxed) + 1,
            environment_fingerprint: key.environment,
            context_stamp: key.context,
            buffer: Arc::clone(&cell.buffer),
            artifact: output.artifact,
            diagnostics: output.diagnostics,
            dependencies: output.dependencies,
        });

        let fresh = {
            let mut state = self.state.write();
            if state.cells.cell_version(cell.id).ok() != Some(cell.version) {
                tracing::debug!(cell = %cell.id, version = cell.version, "discarding compilation of superseded buffer");
                return compilation;
            }
            state.memo.insert(Arc::clone(&compilation));
            state.staleness.mark_fresh(cell.id, cell.epoch)
        };

        let error_count = compilation.diagnostics.iter().filter(|d| d.is_error()).count();
        tracing::debug!(
            cell = %cell.id,
            version = cell.version,
            generation = compilation.generation,
            errors = error_count,
            fresh,
            "compiled cell"
        );
        let _ = self.events.send(WorkspaceEvent::CellCompiled {
            cell_id: cell.id,
            version: cell.version,
            error_count,
        });

        compilation
    }

    fn finish_flight(&self, id: CellId, key: FlightKey) {
        let mut inflight = self.inflight.lock();
        if inflight.get(&id).is_some_and(|flight| flight.key == key) {
            inflight.remove(&id);
        }
    }
}
