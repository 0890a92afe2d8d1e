//! Language intelligence queries over cell compilations.
//!
//! Every query first obtains a current compilation of the cell through the
//! [`CompilationCache`] (compiling if the cell is outdated), then asks the
//! backend for the position-specific answer. Positions are validated against
//! the buffer as it is when the query begins.

mod types;

use std::future::Future;
use std::sync::Arc;

use rustc_hash::FxHashSet;
use tokio_util::sync::CancellationToken;

use crate::cells::CellId;
use crate::compile::{
    BackendResult, Compilation, CompilationCache, CompilerBackend, Diagnostic,
    EvaluationEnvironment, ExternalDependency, Position,
};
use crate::error::{Error, Result};
use crate::workspace::SharedState;

pub use types::{
    CompletionItem, CompletionItemKind, Hover, ParameterInformation, SignatureHelp,
    SignatureInformation,
};

/// Serves diagnostics, hover, completion and signature help.
pub struct LanguageQueryEngine<B: CompilerBackend> {
    state: SharedState<B::Artifact>,
    cache: Arc<CompilationCache<B>>,
    /// Environment used when a query has to compile
    environment: EvaluationEnvironment,
    root: CancellationToken,
}

impl<B: CompilerBackend> LanguageQueryEngine<B> {
    pub(crate) fn new(
        state: SharedState<B::Artifact>,
        cache: Arc<CompilationCache<B>>,
        environment: EvaluationEnvironment,
        root: CancellationToken,
    ) -> Self {
        Self {
            state,
            cache,
            environment,
            root,
        }
    }

    /// Environment used when a query triggers compilation.
    pub fn environment(&self) -> &EvaluationEnvironment {
        &self.environment
    }

    /// Diagnostics of the cell's current compilation.
    pub async fn get_cell_diagnostics(
        &self,
        cell_id: CellId,
        cancel: &CancellationToken,
    ) -> Result<Vec<Diagnostic>> {
        let compilation = self
            .cache
            .get_cell_compilation(cell_id, &self.environment, cancel)
            .await?;
        Ok(compilation.diagnostics.clone())
    }

    pub async fn get_hover(
        &self,
        cell_id: CellId,
        position: Position,
        cancel: &CancellationToken,
    ) -> Result<Option<Hover>> {
        let compilation = self.compilation_at(cell_id, position, cancel).await?;
        let token = self.root.child_token();
        let call = self
            .cache
            .backend()
            .hover(&compilation, position, token.clone());
        self.run_backend(cell_id, cancel, token, call).await
    }

    pub async fn get_completions(
        &self,
        cell_id: CellId,
        position: Position,
        cancel: &CancellationToken,
    ) -> Result<Vec<CompletionItem>> {
        let compilation = self.compilation_at(cell_id, position, cancel).await?;
        let token = self.root.child_token();
        let call = self
            .cache
            .backend()
            .completions(&compilation, position, token.clone());
        self.run_backend(cell_id, cancel, token, call).await
    }

    pub async fn get_signature_help(
        &self,
        cell_id: CellId,
        position: Position,
        cancel: &CancellationToken,
    ) -> Result<Option<SignatureHelp>> {
        let compilation = self.compilation_at(cell_id, position, cancel).await?;
        let token = self.root.child_token();
        let call = self
            .cache
            .backend()
            .signature_help(&compilation, position, token.clone());
        self.run_backend(cell_id, cancel, token, call).await
    }

    /// Packages referenced by the latest compilations of all cells.
    ///
    /// Reads cached state only and never compiles. Results follow chain
    /// order with duplicates removed.
    pub fn get_external_dependencies(&self) -> Vec<ExternalDependency> {
        let state = self.state.read();
        let mut seen = FxHashSet::default();
        let mut dependencies = Vec::new();

        for id in state.topology.sorted(&state.cells) {
            let Some(compilation) = state.memo.get(id) else {
                continue;
            };
            for dependency in &compilation.dependencies {
                if seen.insert(dependency) {
                    dependencies.push(dependency.clone());
                }
            }
        }

        dependencies
    }

    /// Validate `position`, then get a current compilation it falls inside.
    async fn compilation_at(
        &self,
        cell_id: CellId,
        position: Position,
        cancel: &CancellationToken,
    ) -> Result<Arc<Compilation<B::Artifact>>> {
        {
            let state = self.state.read();
            let buffer = state.cells.get_cell_buffer(cell_id)?;
            if position.to_offset(buffer).is_none() {
                return Err(Error::PositionOutOfRange { cell_id, position });
            }
        }

        let compilation = self
            .cache
            .get_cell_compilation(cell_id, &self.environment, cancel)
            .await?;

        // The buffer may have been edited while compiling
        if position.to_offset(&compilation.buffer).is_none() {
            return Err(Error::PositionOutOfRange { cell_id, position });
        }
        Ok(compilation)
    }

    /// Drive a backend query, honoring caller cancellation and disposal.
    async fn run_backend<T>(
        &self,
        cell_id: CellId,
        cancel: &CancellationToken,
        token: CancellationToken,
        call: impl Future<Output = BackendResult<T>>,
    ) -> Result<T> {
        let _guard = token.clone().drop_guard();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = token.cancelled() => return Err(Error::Cancelled),
            result = call => result,
        };
        if cancel.is_cancelled() || token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        result.map_err(|failure| {
            tracing::warn!(cell = %cell_id, "language query failed: {}", failure.message);
            Error::CompilationBackend {
                cell_id,
                message: failure.message,
                diagnostics: failure.diagnostics,
            }
        })
    }
}
