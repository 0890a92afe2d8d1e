//! Types for the cell store.

use uuid::Uuid;

/// Unique identifier for a cell within a workspace.
///
/// Ids are allocated from a per-workspace counter and are never reused, even
/// after the cell is removed. The owning workspace is part of the id so an id
/// handed to the wrong workspace is rejected instead of silently aliasing a
/// different cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CellId {
    workspace: Uuid,
    index: u64,
}

impl CellId {
    pub(crate) fn new(workspace: Uuid, index: u64) -> Self {
        Self { workspace, index }
    }

    /// Identity of the workspace that allocated this id.
    pub fn workspace(&self) -> Uuid {
        self.workspace
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cell_{}", self.index)
    }
}

/// A code cell and its position in the chain.
///
/// Whether a cell is outdated is not stored here; it is derived by the
/// [`StalenessTracker`](crate::staleness::StalenessTracker).
#[derive(Debug, Clone)]
pub struct Cell {
    /// Unique identifier
    pub id: CellId,
    /// Current source text
    pub buffer: String,
    /// Cell positioned immediately before this one
    pub predecessor: Option<CellId>,
    /// Cell positioned immediately after this one
    pub successor: Option<CellId>,
    /// Incremented on every buffer mutation
    pub version: u64,
}

impl Cell {
    pub(crate) fn new(id: CellId, buffer: String) -> Self {
        Self {
            id,
            buffer,
            predecessor: None,
            successor: None,
            version: 1,
        }
    }
}
