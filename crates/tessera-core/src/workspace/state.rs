//! State guarded by the workspace lock.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::cells::{CellId, CellStore};
use crate::compile::MemoTable;
use crate::error::Result;
use crate::staleness::StalenessTracker;
use crate::topology::TopologyResolver;

/// Cell chain, staleness and memoized compilations.
///
/// Kept under one lock so a memoized entry and the freshness flag it
/// justifies can never be observed out of step.
pub struct WorkspaceState<A> {
    pub cells: CellStore,
    pub staleness: StalenessTracker,
    pub memo: MemoTable<A>,
    pub topology: Arc<dyn TopologyResolver>,
}

/// Thread-safe state handle.
pub type SharedState<A> = Arc<RwLock<WorkspaceState<A>>>;

impl<A> WorkspaceState<A> {
    pub fn new(workspace: uuid::Uuid, topology: Arc<dyn TopologyResolver>) -> Self {
        Self {
            cells: CellStore::new(workspace),
            staleness: StalenessTracker::new(),
            memo: MemoTable::new(),
            topology,
        }
    }

    /// Mark `from` and everything after it outdated.
    pub fn invalidate_from(&mut self, from: CellId) -> Result<Vec<CellId>> {
        self.staleness
            .mark_outdated(&self.cells, self.topology.as_ref(), from)
    }

    pub fn is_outdated(&self, id: CellId) -> Result<bool> {
        self.staleness
            .is_outdated(&self.cells, self.topology.as_ref(), id)
    }
}
