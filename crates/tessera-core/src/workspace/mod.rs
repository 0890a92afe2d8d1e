//! The workspace facade.
//!
//! [`WorkspaceService`] composes the cell store, staleness tracking, the
//! compilation cache and the query engine behind one surface used by the
//! editor UI and the evaluation host.
//!
//! # Concurrency
//!
//! Structural mutations (`insert_cell`, `remove_cell`, `move_cell`,
//! `set_cell_buffer`) are synchronous and take the workspace write lock, so
//! they are applied one at a time. Reads and queries take the read lock only
//! long enough to copy what they need and are consistent with the chain as it
//! was when they began. Every async operation takes a cancellation token;
//! [`WorkspaceService::dispose`] cancels everything still running.

mod config;
mod events;
mod state;

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::cells::CellId;
use crate::compile::{
    Compilation, CompilationCache, CompilerBackend, Diagnostic, EvaluationEnvironment,
    ExternalDependency, Position,
};
use crate::error::{Error, Result};
use crate::query::{CompletionItem, Hover, LanguageQueryEngine, SignatureHelp};
use crate::topology::{LinearTopology, TopologyResolver};

pub use config::{DEFAULT_EVENT_CAPACITY, EvaluationContextId, WorkspaceConfiguration};
pub use events::WorkspaceEvent;
pub use state::{SharedState, WorkspaceState};

/// Builder for a [`WorkspaceService`].
pub struct WorkspaceBuilder<B: CompilerBackend> {
    backend: B,
    configuration: WorkspaceConfiguration,
    environment: EvaluationEnvironment,
    topology: Arc<dyn TopologyResolver>,
}

impl<B: CompilerBackend> WorkspaceBuilder<B> {
    pub fn configuration(mut self, configuration: WorkspaceConfiguration) -> Self {
        self.configuration = configuration;
        self
    }

    /// Environment used when queries need to compile.
    pub fn environment(mut self, environment: EvaluationEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn topology(mut self, topology: impl TopologyResolver + 'static) -> Self {
        self.topology = Arc::new(topology);
        self
    }

    pub fn build(self) -> WorkspaceService<B> {
        let evaluation_context_id = EvaluationContextId::new();
        let configuration = Arc::new(self.configuration);
        let (events, _) = broadcast::channel(configuration.event_capacity.max(1));
        let root = CancellationToken::new();

        let state: SharedState<B::Artifact> = Arc::new(RwLock::new(WorkspaceState::new(
            evaluation_context_id.as_uuid(),
            self.topology,
        )));
        let cache = Arc::new(CompilationCache::new(
            Arc::clone(&state),
            Arc::new(self.backend),
            Arc::clone(&configuration),
            events.clone(),
            root.clone(),
        ));
        let queries = LanguageQueryEngine::new(
            Arc::clone(&state),
            Arc::clone(&cache),
            self.environment,
            root.clone(),
        );

        tracing::debug!(
            context = %evaluation_context_id,
            language = %configuration.language,
            "opened workspace"
        );

        WorkspaceService {
            inner: Arc::new(WorkspaceInner {
                evaluation_context_id,
                configuration,
                state,
                cache,
                queries,
                events,
                root,
            }),
        }
    }
}

struct WorkspaceInner<B: CompilerBackend> {
    evaluation_context_id: EvaluationContextId,
    configuration: Arc<WorkspaceConfiguration>,
    state: SharedState<B::Artifact>,
    cache: Arc<CompilationCache<B>>,
    queries: LanguageQueryEngine<B>,
    events: broadcast::Sender<WorkspaceEvent>,
    root: CancellationToken,
}

impl<B: CompilerBackend> Drop for WorkspaceInner<B> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// A notebook workspace: an ordered chain of code cells with incremental
/// compilation and language queries.
///
/// Cloning is cheap and yields another handle to the same workspace. The
/// workspace is disposed when [`dispose`](Self::dispose) is called or the
/// last handle is dropped.
pub struct WorkspaceService<B: CompilerBackend> {
    inner: Arc<WorkspaceInner<B>>,
}

impl<B: CompilerBackend> Clone for WorkspaceService<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: CompilerBackend> WorkspaceService<B> {
    /// Create a workspace with the given configuration and default settings.
    pub fn new(backend: B, configuration: WorkspaceConfiguration) -> Self {
        Self::builder(backend).configuration(configuration).build()
    }

    pub fn builder(backend: B) -> WorkspaceBuilder<B> {
        WorkspaceBuilder {
            backend,
            configuration: WorkspaceConfiguration::default(),
            environment: EvaluationEnvironment::default(),
            topology: Arc::new(LinearTopology),
        }
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    pub fn evaluation_context_id(&self) -> EvaluationContextId {
        self.inner.evaluation_context_id
    }

    pub fn configuration(&self) -> &WorkspaceConfiguration {
        &self.inner.configuration
    }

    /// Environment used when queries need to compile.
    pub fn default_environment(&self) -> &EvaluationEnvironment {
        self.inner.queries.environment()
    }

    /// Subscribe to workspace events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent> {
        self.inner.events.subscribe()
    }

    pub fn compilation_cache(&self) -> &Arc<CompilationCache<B>> {
        &self.inner.cache
    }

    // =========================================================================
    // Cell Structure
    // =========================================================================

    /// Insert a new cell between two adjacent cells.
    ///
    /// The new cell starts outdated, as does everything after it.
    pub fn insert_cell(
        &self,
        initial_buffer: impl Into<String>,
        previous: Option<CellId>,
        next: Option<CellId>,
    ) -> Result<CellId> {
        let initial_buffer = initial_buffer.into();
        let (cell_id, outdated) = self.mutate(|state| {
            let cell_id = state.cells.insert_cell(initial_buffer, previous, next)?;
            state.staleness.track(cell_id);
            let outdated = state.invalidate_from(cell_id)?;
            Ok((cell_id, outdated))
        })?;

        tracing::debug!(cell = %cell_id, "inserted cell");
        self.broadcast(WorkspaceEvent::CellInserted { cell_id });
        self.publish_outdated(outdated);
        Ok(cell_id)
    }

    /// Remove a cell.
    ///
    /// `next` must name the cell's current successor; a mismatch fails with
    /// [`Error::StaleReference`] and leaves the chain unchanged.
    pub fn remove_cell(&self, cell_id: CellId, next: Option<CellId>) -> Result<()> {
        let ((), outdated) = self.mutate(|state| {
            let removed = state.cells.remove_cell(cell_id, next)?;
            state.staleness.forget(cell_id);
            state.memo.evict(cell_id);
            let outdated = match removed.successor {
                Some(successor) => state.invalidate_from(successor)?,
                None => Vec::new(),
            };
            Ok(((), outdated))
        })?;

        self.inner.cache.cancel_flights(&[cell_id]);
        tracing::debug!(cell = %cell_id, "removed cell");
        self.broadcast(WorkspaceEvent::CellRemoved { cell_id });
        self.publish_outdated(outdated);
        Ok(())
    }

    /// Move a cell between two other adjacent cells, keeping its identity.
    ///
    /// Everything from the earlier of the old and new positions onward
    /// becomes outdated.
    pub fn move_cell(
        &self,
        cell_id: CellId,
        previous: Option<CellId>,
        next: Option<CellId>,
    ) -> Result<()> {
        let ((), outdated) = self.mutate(|state| {
            let old_successor = state.cells.move_cell(cell_id, previous, next)?;
            let mut marked: FxHashSet<CellId> =
                state.invalidate_from(cell_id)?.into_iter().collect();
            if let Some(successor) = old_successor {
                marked.extend(state.invalidate_from(successor)?);
            }
            let outdated = state
                .topology
                .sorted(&state.cells)
                .into_iter()
                .filter(|id| marked.contains(id))
                .collect();
            Ok(((), outdated))
        })?;

        tracing::debug!(cell = %cell_id, "moved cell");
        self.broadcast(WorkspaceEvent::CellMoved { cell_id });
        self.publish_outdated(outdated);
        Ok(())
    }

    /// Replace a cell's buffer.
    ///
    /// Bumps the cell's version, drops its memoized compilation and marks it
    /// and every later cell outdated.
    pub fn set_cell_buffer(&self, cell_id: CellId, buffer: impl Into<String>) -> Result<()> {
        let buffer = buffer.into();
        let (version, outdated) = self.mutate(|state| {
            let version = state.cells.set_cell_buffer(cell_id, buffer)?;
            state.memo.evict(cell_id);
            let outdated = state.invalidate_from(cell_id)?;
            Ok((version, outdated))
        })?;

        tracing::trace!(cell = %cell_id, version, "buffer changed");
        self.broadcast(WorkspaceEvent::CellBufferChanged { cell_id, version });
        self.publish_outdated(outdated);
        Ok(())
    }

    // =========================================================================
    // Cell Reads
    // =========================================================================

    pub fn get_cell_buffer(&self, cell_id: CellId) -> Result<String> {
        self.ensure_live()?;
        let state = self.inner.state.read();
        state.cells.get_cell_buffer(cell_id).map(str::to_string)
    }

    /// Cells in compile/execution order.
    pub fn get_topologically_sorted_cell_ids(&self) -> Result<Vec<CellId>> {
        self.ensure_live()?;
        let state = self.inner.state.read();
        Ok(state.topology.sorted(&state.cells))
    }

    /// `cell_id` and every cell whose results depend on it, in order.
    pub fn invalidated_by(&self, cell_id: CellId) -> Result<Vec<CellId>> {
        self.ensure_live()?;
        let state = self.inner.state.read();
        state.topology.invalidated_by(&state.cells, cell_id)
    }

    pub fn cell_count(&self) -> Result<usize> {
        self.ensure_live()?;
        Ok(self.inner.state.read().cells.len())
    }

    /// Whether the cell's analysis results are stale.
    pub fn is_cell_outdated(&self, cell_id: CellId) -> Result<bool> {
        self.ensure_live()?;
        self.inner.state.read().is_outdated(cell_id)
    }

    /// Whether the cell's buffer is a syntactically complete unit.
    ///
    /// Uses the backend's cheap syntactic check; never compiles.
    pub fn is_cell_complete(&self, cell_id: CellId) -> Result<bool> {
        let buffer = self.get_cell_buffer(cell_id)?;
        Ok(self.inner.cache.backend().is_complete(&buffer))
    }

    // =========================================================================
    // Compilation and Queries
    // =========================================================================

    /// Get a current compilation of the cell under `environment`.
    ///
    /// The compilation carries its diagnostics.
    pub async fn get_cell_compilation(
        &self,
        cell_id: CellId,
        environment: &EvaluationEnvironment,
        cancel: &CancellationToken,
    ) -> Result<Arc<Compilation<B::Artifact>>> {
        self.ensure_live()?;
        self.inner
            .cache
            .get_cell_compilation(cell_id, environment, cancel)
            .await
    }

    pub async fn get_cell_diagnostics(
        &self,
        cell_id: CellId,
        cancel: &CancellationToken,
    ) -> Result<Vec<Diagnostic>> {
        self.ensure_live()?;
        self.inner.queries.get_cell_diagnostics(cell_id, cancel).await
    }

    pub async fn get_hover(
        &self,
        cell_id: CellId,
        position: Position,
        cancel: &CancellationToken,
    ) -> Result<Option<Hover>> {
        self.ensure_live()?;
        self.inner.queries.get_hover(cell_id, position, cancel).await
    }

    pub async fn get_completions(
        &self,
        cell_id: CellId,
        position: Position,
        cancel: &CancellationToken,
    ) -> Result<Vec<CompletionItem>> {
        self.ensure_live()?;
        self.inner
            .queries
            .get_completions(cell_id, position, cancel)
            .await
    }

    pub async fn get_signature_help(
        &self,
        cell_id: CellId,
        position: Position,
        cancel: &CancellationToken,
    ) -> Result<Option<SignatureHelp>> {
        self.ensure_live()?;
        self.inner
            .queries
            .get_signature_help(cell_id, position, cancel)
            .await
    }

    /// Packages referenced by the latest compilations of all cells.
    ///
    /// Never compiles; returns an empty list once disposed.
    pub fn get_external_dependencies(&self) -> Vec<ExternalDependency> {
        if self.is_disposed() {
            return Vec::new();
        }
        self.inner.queries.get_external_dependencies()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Cancel all in-flight compilations and queries and refuse further use.
    pub fn dispose(&self) {
        if self.inner.root.is_cancelled() {
            return;
        }
        self.inner.root.cancel();
        self.inner.cache.cancel_all();

        tracing::debug!(context = %self.inner.evaluation_context_id, "disposed workspace");
        self.broadcast(WorkspaceEvent::Disposed);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.root.is_cancelled()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    /// Apply a structural mutation under the write lock.
    fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut WorkspaceState<B::Artifact>) -> Result<(T, Vec<CellId>)>,
    ) -> Result<(T, Vec<CellId>)> {
        self.ensure_live()?;
        let mut state = self.inner.state.write();
        apply(&mut *state)
    }

    /// Cancel compiles of newly outdated cells and notify subscribers.
    fn publish_outdated(&self, outdated: Vec<CellId>) {
        if outdated.is_empty() {
            return;
        }
        self.inner.cache.cancel_flights(&outdated);
        self.broadcast(WorkspaceEvent::CellsOutdated { cell_ids: outdated });
    }

    /// Broadcast an event, ignoring the case where nobody is listening.
    fn broadcast(&self, event: WorkspaceEvent) {
        let _ = self.inner.events.send(event);
    }
}
