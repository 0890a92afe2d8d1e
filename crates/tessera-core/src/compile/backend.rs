//! The compiler backend capability.
//!
//! The engine never parses or type-checks code itself. Hosts plug in a
//! [`CompilerBackend`] that turns a cell's buffer plus the compilations of the
//! cells before it into an artifact and diagnostics, and answers
//! position-specific queries against that artifact.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::types::{Compilation, Diagnostic, EvaluationEnvironment, ExternalDependency, Position};
use crate::cells::CellId;
use crate::query::{CompletionItem, Hover, SignatureHelp};
use crate::workspace::WorkspaceConfiguration;

/// Everything the backend needs to compile one cell.
pub struct CompileRequest<'a, A> {
    /// Cell being compiled
    pub cell_id: CellId,

    /// Buffer text at the version being compiled
    pub buffer: &'a str,

    /// Compilations of every preceding cell, in order
    pub context: &'a [Arc<Compilation<A>>],

    /// Runtime the compiled code will execute against
    pub environment: &'a EvaluationEnvironment,

    /// Options the workspace was opened with
    pub configuration: &'a WorkspaceConfiguration,
}

/// Successful backend output for one cell.
pub struct BackendOutput<A> {
    pub artifact: A,
    pub diagnostics: Vec<Diagnostic>,
    pub dependencies: Vec<ExternalDependency>,
}

impl<A> BackendOutput<A> {
    pub fn new(artifact: A) -> Self {
        Self {
            artifact,
            diagnostics: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Vec<Diagnostic>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<ExternalDependency>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// A backend failure (as opposed to code with errors in it, which is a
/// successful compile carrying error diagnostics).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct BackendFailure {
    pub message: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl BackendFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            diagnostics: Vec::new(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Vec<Diagnostic>) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

/// Result type for backend calls.
pub type BackendResult<T> = std::result::Result<T, BackendFailure>;

/// Language compiler and analysis services for cells.
///
/// Every async method receives a cancellation token. Implementations should
/// observe it at their own suspension points; the engine additionally drops
/// the returned future once the token fires, so a backend that ignores it is
/// still abandoned.
#[async_trait]
pub trait CompilerBackend: Send + Sync + 'static {
    /// Backend-specific compiled artifact.
    type Artifact: Send + Sync + 'static;

    /// Cheap syntactic check: is `buffer` a complete, submittable unit?
    ///
    /// Must not perform semantic analysis.
    fn is_complete(&self, buffer: &str) -> bool;

    /// Compile a cell against the compilations of its predecessors.
    async fn compile(
        &self,
        request: CompileRequest<'_, Self::Artifact>,
        cancel: CancellationToken,
    ) -> BackendResult<BackendOutput<Self::Artifact>>;

    /// Hover information at `position`.
    async fn hover(
        &self,
        compilation: &Compilation<Self::Artifact>,
        position: Position,
        cancel: CancellationToken,
    ) -> BackendResult<Option<Hover>>;

    /// Completion candidates at `position`.
    async fn completions(
        &self,
        compilation: &Compilation<Self::Artifact>,
        position: Position,
        cancel: CancellationToken,
    ) -> BackendResult<Vec<CompletionItem>>;

    /// Signature help for the call enclosing `position`.
    async fn signature_help(
        &self,
        compilation: &Compilation<Self::Artifact>,
        position: Position,
        cancel: CancellationToken,
    ) -> BackendResult<Option<SignatureHelp>>;
}
