//! Arena of cells linked into a single ordered chain.

use rustc_hash::FxHashMap;
use uuid::Uuid;

use super::types::{Cell, CellId};
use crate::error::{Error, Result};

/// Owns cell identity, buffer text, and ordering.
///
/// Cells live in an arena keyed by id; order is expressed only through the
/// `predecessor`/`successor` fields, so insertion and removal relink at most
/// three cells regardless of chain length. The store knows nothing about
/// compilation.
pub struct CellStore {
    /// Identity of the owning workspace
    workspace: Uuid,
    /// Cells by ID
    cells: FxHashMap<CellId, Cell>,
    /// First cell in the chain
    head: Option<CellId>,
    /// Last cell in the chain
    tail: Option<CellId>,
    /// Next cell index to assign
    next_index: u64,
}

impl CellStore {
    /// Create an empty store for the given workspace.
    pub fn new(workspace: Uuid) -> Self {
        Self {
            workspace,
            cells: FxHashMap::default(),
            head: None,
            tail: None,
            next_index: 1,
        }
    }

    /// Identity of the owning workspace.
    pub fn workspace(&self) -> Uuid {
        self.workspace
    }

    /// Insert a new cell between `previous` and `next`.
    ///
    /// The neighbors must be adjacent in the current chain. Passing `None`
    /// for both is only valid while the store is empty; `(Some(tail), None)`
    /// appends and `(None, Some(head))` prepends.
    pub fn insert_cell(
        &mut self,
        initial_buffer: impl Into<String>,
        previous: Option<CellId>,
        next: Option<CellId>,
    ) -> Result<CellId> {
        self.check_slot(previous, next, None)?;

        let id = CellId::new(self.workspace, self.next_index);
        self.next_index += 1;

        self.cells.insert(id, Cell::new(id, initial_buffer.into()));
        self.splice(id, previous, next);

        tracing::trace!(%id, "inserted cell");
        Ok(id)
    }

    /// Remove a cell, relinking its neighbors.
    ///
    /// `next` must name the cell's current successor. A mismatch means the
    /// caller acted on an outdated view of the chain and nothing is changed.
    /// Returns the removed cell with its links as they were at removal.
    pub fn remove_cell(&mut self, id: CellId, next: Option<CellId>) -> Result<Cell> {
        let actual = self.get(id)?.successor;
        if actual != next {
            return Err(Error::StaleReference {
                cell_id: id,
                expected: next,
                actual,
            });
        }

        self.unlink(id);
        let cell = self.cells.remove(&id).ok_or(Error::NotFound(id))?;

        tracing::trace!(%id, "removed cell");
        Ok(cell)
    }

    /// Move an existing cell between `previous` and `next`.
    ///
    /// Adjacency is checked against the chain as it would be with the cell
    /// taken out. The cell keeps its id, buffer and version. Returns the
    /// cell's successor before the move.
    pub fn move_cell(
        &mut self,
        id: CellId,
        previous: Option<CellId>,
        next: Option<CellId>,
    ) -> Result<Option<CellId>> {
        let old_successor = self.get(id)?.successor;
        if previous == Some(id) || next == Some(id) {
            return Err(Error::InvalidPosition(format!(
                "{} cannot be positioned relative to itself",
                id
            )));
        }
        self.check_slot(previous, next, Some(id))?;

        self.unlink(id);
        self.splice(id, previous, next);

        tracing::trace!(%id, "moved cell");
        Ok(old_successor)
    }

    /// Replace a cell's buffer and return its new version.
    pub fn set_cell_buffer(&mut self, id: CellId, buffer: impl Into<String>) -> Result<u64> {
        let cell = self.get_mut(id)?;
        cell.buffer = buffer.into();
        cell.version += 1;
        Ok(cell.version)
    }

    /// Get a cell's buffer.
    pub fn get_cell_buffer(&self, id: CellId) -> Result<&str> {
        self.get(id).map(|cell| cell.buffer.as_str())
    }

    /// Get a cell's current version.
    pub fn cell_version(&self, id: CellId) -> Result<u64> {
        self.get(id).map(|cell| cell.version)
    }

    /// Get a cell by ID.
    pub fn get(&self, id: CellId) -> Result<&Cell> {
        self.cells.get(&id).ok_or(Error::NotFound(id))
    }

    fn get_mut(&mut self, id: CellId) -> Result<&mut Cell> {
        self.cells.get_mut(&id).ok_or(Error::NotFound(id))
    }

    pub fn contains(&self, id: CellId) -> bool {
        self.cells.contains_key(&id)
    }

    pub fn head(&self) -> Option<CellId> {
        self.head
    }

    pub fn tail(&self) -> Option<CellId> {
        self.tail
    }

    pub fn predecessor_of(&self, id: CellId) -> Result<Option<CellId>> {
        self.get(id).map(|cell| cell.predecessor)
    }

    pub fn successor_of(&self, id: CellId) -> Result<Option<CellId>> {
        self.get(id).map(|cell| cell.successor)
    }

    /// Get the number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Iterate cells from head to tail.
    pub fn iter(&self) -> ChainIter<'_> {
        ChainIter {
            store: self,
            next: self.head,
        }
    }

    /// Verify that `(previous, next)` names a slot in the chain.
    ///
    /// With `skipping`, the chain is evaluated as if that cell were absent.
    fn check_slot(
        &self,
        previous: Option<CellId>,
        next: Option<CellId>,
        skipping: Option<CellId>,
    ) -> Result<()> {
        for id in previous.iter().chain(next.iter()) {
            if id.workspace() != self.workspace {
                return Err(Error::InvalidPosition(format!(
                    "{} belongs to a different workspace",
                    id
                )));
            }
            if !self.contains(*id) {
                return Err(Error::InvalidPosition(format!("{} is not in the workspace", id)));
            }
        }

        let remaining = self.len() - usize::from(skipping.is_some());
        let skip = |link: Option<CellId>, forward: bool| -> Option<CellId> {
            match (link, skipping) {
                (Some(link), Some(skipped)) if link == skipped => {
                    let cell = &self.cells[&skipped];
                    if forward { cell.successor } else { cell.predecessor }
                }
                _ => link,
            }
        };

        match (previous, next) {
            (None, None) if remaining == 0 => Ok(()),
            (None, None) => Err(Error::InvalidPosition(
                "both neighbors absent in a non-empty workspace".to_string(),
            )),
            (Some(p), None) => match skip(self.cells[&p].successor, true) {
                None => Ok(()),
                Some(after) => Err(Error::InvalidPosition(format!(
                    "{} is not the last cell (followed by {})",
                    p, after
                ))),
            },
            (None, Some(n)) => match skip(self.cells[&n].predecessor, false) {
                None => Ok(()),
                Some(before) => Err(Error::InvalidPosition(format!(
                    "{} is not the first cell (preceded by {})",
                    n, before
                ))),
            },
            (Some(p), Some(n)) => {
                if skip(self.cells[&p].successor, true) == Some(n) {
                    Ok(())
                } else {
                    Err(Error::InvalidPosition(format!(
                        "{} and {} are not adjacent",
                        p, n
                    )))
                }
            }
        }
    }

    /// Link a detached cell between two adjacent neighbors.
    fn splice(&mut self, id: CellId, previous: Option<CellId>, next: Option<CellId>) {
        if let Some(cell) = self.cells.get_mut(&id) {
            cell.predecessor = previous;
            cell.successor = next;
        }

        match previous.and_then(|p| self.cells.get_mut(&p)) {
            Some(prev) => prev.successor = Some(id),
            None => self.head = Some(id),
        }
        match next.and_then(|n| self.cells.get_mut(&n)) {
            Some(next) => next.predecessor = Some(id),
            None => self.tail = Some(id),
        }
    }

    /// Detach a cell from the chain, joining its neighbors.
    fn unlink(&mut self, id: CellId) {
        let Some((predecessor, successor)) = self
            .cells
            .get_mut(&id)
            .map(|cell| (cell.predecessor.take(), cell.successor.take()))
        else {
            return;
        };

        match predecessor.and_then(|p| self.cells.get_mut(&p)) {
            Some(prev) => prev.successor = successor,
            None => self.head = successor,
        }
        match successor.and_then(|s| self.cells.get_mut(&s)) {
            Some(next) => next.predecessor = predecessor,
            None => self.tail = predecessor,
        }
    }
}

/// Iterator over cells in chain order.
pub struct ChainIter<'a> {
    store: &'a CellStore,
    next: Option<CellId>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a Cell;

    fn next(&mut self) -> Option<Self::Item> {
        let cell = self.store.cells.get(&self.next?)?;
        self.next = cell.successor;
        Some(cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(store: &CellStore) -> Vec<CellId> {
        store.iter().map(|c| c.id).collect()
    }

    /// Check that links are mutually consistent and form one chain.
    fn assert_chain_consistent(store: &CellStore) {
        let order = ids(store);
        assert_eq!(order.len(), store.len(), "chain does not reach every cell");
        assert_eq!(store.head(), order.first().copied());
        assert_eq!(store.tail(), order.last().copied());
        for window in order.windows(2) {
            assert_eq!(store.successor_of(window[0]).unwrap(), Some(window[1]));
            assert_eq!(store.predecessor_of(window[1]).unwrap(), Some(window[0]));
        }
    }

    #[test]
    fn test_empty_store() {
        let store = CellStore::new(Uuid::new_v4());
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
        assert!(store.head().is_none());
        assert!(store.tail().is_none());
    }

    #[test]
    fn test_insert_first_cell() {
        let mut store = CellStore::new(Uuid::new_v4());
        let a = store.insert_cell("1+1", None, None).unwrap();
        assert_eq!(ids(&store), vec![a]);
        assert_eq!(store.get_cell_buffer(a).unwrap(), "1+1");
        assert_eq!(store.cell_version(a).unwrap(), 1);
    }

    #[test]
    fn test_ambiguous_insert_rejected() {
        let mut store = CellStore::new(Uuid::new_v4());
        store.insert_cell("a", None, None).unwrap();
        let err = store.insert_cell("b", None, None).unwrap_err();
        assert!(matches!(err, Error::InvalidPosition(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_append_prepend_and_middle() {
        let mut store = CellStore::new(Uuid::new_v4());
        let a = store.insert_cell("a", None, None).unwrap();
        let c = store.insert_cell("c", Some(a), None).unwrap();
        let b = store.insert_cell("b", Some(a), Some(c)).unwrap();
        let z = store.insert_cell("z", None, Some(a)).unwrap();
        assert_eq!(ids(&store), vec![z, a, b, c]);
        assert_chain_consistent(&store);
    }

    #[test]
    fn test_non_adjacent_insert_rejected() {
        let mut store = CellStore::new(Uuid::new_v4());
        let a = store.insert_cell("a", None, None).unwrap();
        let b = store.insert_cell("b", Some(a), None).unwrap();
        let c = store.insert_cell("c", Some(b), None).unwrap();

        assert!(matches!(
            store.insert_cell("x", Some(a), Some(c)),
            Err(Error::InvalidPosition(_))
        ));
        // Not the tail
        assert!(matches!(
            store.insert_cell("x", Some(a), None),
            Err(Error::InvalidPosition(_))
        ));
        // Not the head
        assert!(matches!(
            store.insert_cell("x", None, Some(b)),
            Err(Error::InvalidPosition(_))
        ));
        assert_eq!(ids(&store), vec![a, b, c]);
    }

    #[test]
    fn test_foreign_cell_rejected() {
        let mut other = CellStore::new(Uuid::new_v4());
        let foreign = other.insert_cell("x", None, None).unwrap();

        let mut store = CellStore::new(Uuid::new_v4());
        store.insert_cell("a", None, None).unwrap();
        let err = store.insert_cell("b", Some(foreign), None).unwrap_err();
        assert!(matches!(err, Error::InvalidPosition(_)));
    }

    #[test]
    fn test_remove_relinks_neighbors() {
        let mut store = CellStore::new(Uuid::new_v4());
        let a = store.insert_cell("a", None, None).unwrap();
        let b = store.insert_cell("b", Some(a), None).unwrap();
        let c = store.insert_cell("c", Some(b), None).unwrap();

        let removed = store.remove_cell(b, Some(c)).unwrap();
        assert_eq!(removed.predecessor, Some(a));
        assert_eq!(removed.successor, Some(c));
        assert_eq!(ids(&store), vec![a, c]);
        assert_chain_consistent(&store);

        store.remove_cell(a, Some(c)).unwrap();
        store.remove_cell(c, None).unwrap();
        assert!(store.is_empty());
        assert!(store.head().is_none());
    }

    #[test]
    fn test_remove_with_stale_successor() {
        let mut store = CellStore::new(Uuid::new_v4());
        let a = store.insert_cell("a", None, None).unwrap();
        let b = store.insert_cell("b", Some(a), None).unwrap();

        let err = store.remove_cell(a, None).unwrap_err();
        assert!(matches!(
            err,
            Error::StaleReference { expected: None, actual: Some(id), .. } if id == b
        ));
        assert_eq!(ids(&store), vec![a, b]);
    }

    #[test]
    fn test_remove_unknown_cell() {
        let mut store = CellStore::new(Uuid::new_v4());
        let a = store.insert_cell("a", None, None).unwrap();
        store.remove_cell(a, None).unwrap();
        assert!(matches!(store.remove_cell(a, None), Err(Error::NotFound(_))));
        assert!(matches!(store.get_cell_buffer(a), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_ids_never_reused() {
        let mut store = CellStore::new(Uuid::new_v4());
        let a = store.insert_cell("a", None, None).unwrap();
        store.remove_cell(a, None).unwrap();
        let b = store.insert_cell("b", None, None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_insert_then_remove_round_trip() {
        let mut store = CellStore::new(Uuid::new_v4());
        let a = store.insert_cell("a", None, None).unwrap();
        let b = store.insert_cell("b", Some(a), None).unwrap();
        let before = ids(&store);

        let x = store.insert_cell("x", Some(a), Some(b)).unwrap();
        store.remove_cell(x, Some(b)).unwrap();

        assert_eq!(ids(&store), before);
        assert_chain_consistent(&store);
    }

    #[test]
    fn test_set_buffer_bumps_version() {
        let mut store = CellStore::new(Uuid::new_v4());
        let a = store.insert_cell("1+1", None, None).unwrap();
        assert_eq!(store.set_cell_buffer(a, "3+3").unwrap(), 2);
        assert_eq!(store.set_cell_buffer(a, "3+3").unwrap(), 3);
        assert_eq!(store.get_cell_buffer(a).unwrap(), "3+3");
    }

    #[test]
    fn test_move_cell() {
        let mut store = CellStore::new(Uuid::new_v4());
        let a = store.insert_cell("a", None, None).unwrap();
        let b = store.insert_cell("b", Some(a), None).unwrap();
        let c = store.insert_cell("c", Some(b), None).unwrap();

        // Move c to the front
        let old_successor = store.move_cell(c, None, Some(a)).unwrap();
        assert_eq!(old_successor, None);
        assert_eq!(ids(&store), vec![c, a, b]);
        assert_chain_consistent(&store);

        // And back to the end; b is the tail once c is taken out
        store.move_cell(c, Some(b), None).unwrap();
        assert_eq!(ids(&store), vec![a, b, c]);
        assert_chain_consistent(&store);

        // Swap a and b: a goes between b and c
        store.move_cell(a, Some(b), Some(c)).unwrap();
        assert_eq!(ids(&store), vec![b, a, c]);
        assert_chain_consistent(&store);
    }

    #[test]
    fn test_move_rejects_invalid_slots() {
        let mut store = CellStore::new(Uuid::new_v4());
        let a = store.insert_cell("a", None, None).unwrap();
        let b = store.insert_cell("b", Some(a), None).unwrap();
        let c = store.insert_cell("c", Some(b), None).unwrap();

        assert!(matches!(
            store.move_cell(a, Some(a), Some(b)),
            Err(Error::InvalidPosition(_))
        ));
        assert!(matches!(
            store.move_cell(c, Some(a), None),
            Err(Error::InvalidPosition(_))
        ));
        assert_eq!(ids(&store), vec![a, b, c]);
    }

    #[test]
    fn test_move_only_cell() {
        let mut store = CellStore::new(Uuid::new_v4());
        let a = store.insert_cell("a", None, None).unwrap();
        store.move_cell(a, None, None).unwrap();
        assert_eq!(ids(&store), vec![a]);
    }

    #[test]
    fn test_random_edit_sequence_keeps_chain() {
        // Deterministic pseudo-random sequence of inserts and removals
        let mut store = CellStore::new(Uuid::new_v4());
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for step in 0..500 {
            let order = ids(&store);
            if order.is_empty() || next() % 3 != 0 {
                let slot = (next() as usize) % (order.len() + 1);
                let previous = slot.checked_sub(1).map(|i| order[i]);
                let following = order.get(slot).copied();
                store
                    .insert_cell(format!("cell {}", step), previous, following)
                    .unwrap();
            } else {
                let victim = (next() as usize) % order.len();
                store
                    .remove_cell(order[victim], order.get(victim + 1).copied())
                    .unwrap();
            }

            assert_chain_consistent(&store);
            let order = ids(&store);
            let unique: std::collections::HashSet<_> = order.iter().collect();
            assert_eq!(unique.len(), order.len(), "duplicate ids in chain");
        }
    }
}
