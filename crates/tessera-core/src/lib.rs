//! Incremental code-cell workspace engine for interactive notebooks.
//!
//! This crate provides:
//! - An ordered chain of code cells with stable identities
//! - Staleness tracking that flows forward from every edit
//! - Memoized, single-flight, cancellable compilation through a pluggable
//!   [`CompilerBackend`]
//! - Diagnostics, hover, completion and signature help per cell
//! - A [`WorkspaceService`] facade tying it together

pub mod cells;
pub mod compile;
pub mod error;
pub mod query;
pub mod staleness;
pub mod topology;
pub mod workspace;

pub use cells::{Cell, CellId, CellStore};
pub use compile::{
    BackendFailure, BackendOutput, BackendResult, CompilationCache, CompileRequest,
    CompilerBackend, Compilation, Diagnostic, DiagnosticSeverity, EvaluationEnvironment,
    ExternalDependency, Position, Range,
};
pub use error::{Error, Result};
pub use query::{
    CompletionItem, CompletionItemKind, Hover, LanguageQueryEngine, ParameterInformation,
    SignatureHelp, SignatureInformation,
};
pub use staleness::StalenessTracker;
pub use topology::{LinearTopology, TopologyResolver};
pub use workspace::{
    EvaluationContextId, WorkspaceBuilder, WorkspaceConfiguration, WorkspaceEvent,
    WorkspaceService,
};

/// Re-exported so hosts can build tokens without naming tokio-util directly.
pub use tokio_util::sync::CancellationToken;
