//! Compile and execution order for cells.
//!
//! Cells accumulate state top-down, so the order is the chain order. The
//! resolver is still a separate seam: callers ask it for order, dependencies
//! and dependents instead of walking links themselves, which keeps the
//! linear model replaceable.

use crate::cells::{CellId, CellStore};
use crate::error::Result;

/// Derives ordering relationships from the cell store.
pub trait TopologyResolver: Send + Sync {
    /// All cells in compile/execution order.
    fn sorted(&self, cells: &CellStore) -> Vec<CellId>;

    /// Cells whose compilations form the context of `cell`, in order.
    fn dependencies(&self, cells: &CellStore, cell: CellId) -> Result<Vec<CellId>>;

    /// `cell` plus every cell that may observe its declarations, in order.
    fn invalidated_by(&self, cells: &CellStore, cell: CellId) -> Result<Vec<CellId>>;
}

/// Resolver for REPL semantics: every cell depends on all cells before it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearTopology;

impl TopologyResolver for LinearTopology {
    fn sorted(&self, cells: &CellStore) -> Vec<CellId> {
        cells.iter().map(|cell| cell.id).collect()
    }

    fn dependencies(&self, cells: &CellStore, cell: CellId) -> Result<Vec<CellId>> {
        let mut deps = Vec::new();
        let mut current = cells.predecessor_of(cell)?;
        while let Some(id) = current {
            deps.push(id);
            current = cells.predecessor_of(id)?;
        }
        deps.reverse();
        Ok(deps)
    }

    fn invalidated_by(&self, cells: &CellStore, cell: CellId) -> Result<Vec<CellId>> {
        let mut invalidated = vec![cell];
        let mut current = cells.successor_of(cell)?;
        while let Some(id) = current {
            invalidated.push(id);
            current = cells.successor_of(id)?;
        }
        Ok(invalidated)
    }
}
