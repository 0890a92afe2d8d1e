//! Error types for tessera-core.

use thiserror::Error;

use crate::cells::CellId;
use crate::compile::{Diagnostic, Position};

/// Result type for tessera-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tessera-core.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Cell id is unknown to this workspace (never existed or was removed).
    #[error("cell not found: {0}")]
    NotFound(CellId),

    /// Insert or move neighbors do not describe a valid slot in the chain.
    #[error("invalid position: {0}")]
    InvalidPosition(String),

    /// The caller's view of the chain is out of date.
    #[error(
        "stale reference for {cell_id}: expected successor {}, found {}",
        display_opt(expected),
        display_opt(actual)
    )]
    StaleReference {
        cell_id: CellId,
        expected: Option<CellId>,
        actual: Option<CellId>,
    },

    /// Query position lies outside the cell's buffer.
    #[error("position {position} is out of range for {cell_id}")]
    PositionOutOfRange { cell_id: CellId, position: Position },

    /// The compiler backend failed.
    #[error("compilation failed for {cell_id}: {message}")]
    CompilationBackend {
        cell_id: CellId,
        message: String,
        diagnostics: Vec<Diagnostic>,
    },

    /// Operation was cancelled by its caller or by workspace disposal.
    #[error("operation cancelled")]
    Cancelled,

    /// The workspace has been disposed.
    #[error("workspace disposed")]
    Disposed,
}

impl Error {
    /// Returns true for cooperative cancellation, which callers should not
    /// surface as a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

fn display_opt(id: &Option<CellId>) -> String {
    id.map(|id| id.to_string())
        .unwrap_or_else(|| "<none>".to_string())
}
