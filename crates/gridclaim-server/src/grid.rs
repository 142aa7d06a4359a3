//! Authoritative in-memory grid: coordinate → owner record.

use std::collections::{BTreeSet, HashMap};

use gridclaim_core::{Cell, Coord, OwnerFields};

/// Owned cells, indexed both by coordinate and by owner.
///
/// A coordinate is present only while owned. The owner index always holds
/// exactly the coordinates whose cell names that owner.
#[derive(Debug, Default)]
pub struct GridStore {
    cells: HashMap<Coord, Cell>,
    by_owner: HashMap<String, BTreeSet<Coord>>,
}

impl GridStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `cell` iff its coordinate is unowned. Returns whether it won.
    pub fn try_claim(&mut self, cell: Cell) -> bool {
        let coord = cell.coord();
        if self.cells.contains_key(&coord) {
            return false;
        }
        self.by_owner
            .entry(cell.owner_id.clone())
            .or_default()
            .insert(coord);
        self.cells.insert(coord, cell);
        true
    }

    pub fn get(&self, coord: Coord) -> Option<&Cell> {
        self.cells.get(&coord)
    }

    /// All owned cells, row-major.
    pub fn snapshot(&self) -> Vec<Cell> {
        let mut cells: Vec<Cell> = self.cells.values().cloned().collect();
        cells.sort_by_key(|c| (c.y, c.x));
        cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn owned_by(&self, owner_id: &str) -> usize {
        self.by_owner.get(owner_id).map_or(0, BTreeSet::len)
    }

    /// Remove every cell owned by `owner_id` and return exactly those cells.
    ///
    /// Only session teardown may call this.
    pub(crate) fn release_all(&mut self, owner_id: &str) -> Vec<Cell> {
        let Some(coords) = self.by_owner.remove(owner_id) else {
            return Vec::new();
        };
        coords
            .into_iter()
            .filter_map(|coord| self.cells.remove(&coord))
            .collect()
    }

    /// Rewrite denormalized owner fields without touching ownership.
    /// Returns the number of cells rewritten.
    pub fn update_owner_fields(&mut self, owner_id: &str, fields: &OwnerFields) -> usize {
        let Some(coords) = self.by_owner.get(owner_id) else {
            return 0;
        };
        let mut updated = 0;
        for coord in coords {
            if let Some(cell) = self.cells.get_mut(coord) {
                fields.apply_to_cell(cell);
                updated += 1;
            }
        }
        updated
    }
}
