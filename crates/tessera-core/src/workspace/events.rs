//! Change notifications published by a workspace.

use serde::Serialize;

use crate::cells::CellId;

/// Event broadcast to workspace subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkspaceEvent {
    /// A cell was inserted.
    CellInserted { cell_id: CellId },

    /// A cell was removed.
    CellRemoved { cell_id: CellId },

    /// A cell was moved to a new position.
    CellMoved { cell_id: CellId },

    /// A cell's buffer was replaced.
    CellBufferChanged { cell_id: CellId, version: u64 },

    /// Cells that must be recompiled before their results can be trusted.
    CellsOutdated { cell_ids: Vec<CellId> },

    /// A compilation was memoized.
    CellCompiled {
        cell_id: CellId,
        version: u64,
        error_count: usize,
    },

    /// The workspace was disposed.
    Disposed,
}
