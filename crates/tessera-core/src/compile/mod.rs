//! Compilation pipeline for workspace cells.
//!
//! # Module Structure
//!
//! - `types` - Positions, diagnostics, environments and the `Compilation` record
//! - `backend` - The `CompilerBackend` capability hosts plug in
//! - `cache` - Memoized, single-flight compilation per cell

mod backend;
mod cache;
mod types;

pub use backend::{BackendFailure, BackendOutput, BackendResult, CompileRequest, CompilerBackend};
pub use cache::{CompilationCache, MemoTable};
pub use types::{
    Compilation, Diagnostic, DiagnosticSeverity, EvaluationEnvironment, ExternalDependency,
    Position, Range,
};
