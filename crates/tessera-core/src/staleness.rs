//! Tracking of cells whose analysis results are out of date.
//!
//! Declarations flow forward only: an edit, insertion or removal at cell X
//! invalidates X and everything positioned after it. A cell becomes fresh
//! again only when a compilation of its current buffer is memoized.
//!
//! Each mark bumps a per-cell epoch. A compile records the epoch it started
//! from and may only clear the flag if the epoch is unchanged, so a compile
//! that raced an edit cannot mark the newer buffer fresh.

use rustc_hash::FxHashMap;

use crate::cells::{CellId, CellStore};
use crate::error::{Error, Result};
use crate::topology::TopologyResolver;

#[derive(Debug, Clone, Copy)]
struct Staleness {
    outdated: bool,
    epoch: u64,
}

/// Per-cell outdated flags and staleness epochs.
#[derive(Debug, Default)]
pub struct StalenessTracker {
    cells: FxHashMap<CellId, Staleness>,
}

impl StalenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a new cell. New cells are outdated.
    pub fn track(&mut self, id: CellId) {
        self.cells.insert(
            id,
            Staleness {
                outdated: true,
                epoch: 0,
            },
        );
    }

    /// Stop tracking a removed cell.
    pub fn forget(&mut self, id: CellId) {
        self.cells.remove(&id);
    }

    /// Mark `from` and every cell it invalidates as outdated.
    ///
    /// Returns the marked cells in chain order.
    pub fn mark_outdated(
        &mut self,
        cells: &CellStore,
        topology: &dyn TopologyResolver,
        from: CellId,
    ) -> Result<Vec<CellId>> {
        let invalidated = topology.invalidated_by(cells, from)?;
        for id in &invalidated {
            let entry = self.cells.entry(*id).or_insert(Staleness {
                outdated: true,
                epoch: 0,
            });
            entry.outdated = true;
            entry.epoch += 1;
        }
        tracing::trace!(%from, count = invalidated.len(), "marked cells outdated");
        Ok(invalidated)
    }

    /// Current staleness epoch of a cell.
    pub fn epoch(&self, id: CellId) -> Result<u64> {
        self.cells
            .get(&id)
            .map(|s| s.epoch)
            .ok_or(Error::NotFound(id))
    }

    /// Clear the outdated flag if nothing marked the cell since `observed_epoch`.
    ///
    /// Returns whether the cell is now fresh.
    pub fn mark_fresh(&mut self, id: CellId, observed_epoch: u64) -> bool {
        match self.cells.get_mut(&id) {
            Some(entry) if entry.epoch == observed_epoch => {
                entry.outdated = false;
                true
            }
            _ => false,
        }
    }

    /// Whether the cell's own flag is set, ignoring predecessors.
    pub fn is_flagged(&self, id: CellId) -> bool {
        self.cells.get(&id).is_none_or(|s| s.outdated)
    }

    /// Whether the cell or any cell it depends on is outdated.
    pub fn is_outdated(
        &self,
        cells: &CellStore,
        topology: &dyn TopologyResolver,
        id: CellId,
    ) -> Result<bool> {
        if !cells.contains(id) {
            return Err(Error::NotFound(id));
        }
        if self.is_flagged(id) {
            return Ok(true);
        }
        Ok(topology
            .dependencies(cells, id)?
            .into_iter()
            .any(|dep| self.is_flagged(dep)))
    }
}
