use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A grid coordinate. Only constructed for in-bounds positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub x: u32,
    pub y: u32,
}

impl Coord {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Extent of the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridDimensions {
    pub width: u32,
    pub height: u32,
}

impl Default for GridDimensions {
    fn default() -> Self {
        Self {
            width: 40,
            height: 20,
        }
    }
}

impl GridDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Resolve raw wire coordinates into a `Coord`, or `None` when they fall
    /// outside `0..width` x `0..height`.
    pub fn coord(&self, x: i64, y: i64) -> Option<Coord> {
        let x = u32::try_from(x).ok().filter(|&x| x < self.width)?;
        let y = u32::try_from(y).ok().filter(|&y| y < self.height)?;
        Some(Coord { x, y })
    }

    pub fn contains(&self, coord: Coord) -> bool {
        coord.x < self.width && coord.y < self.height
    }

    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Ownership record of one claimed grid position.
///
/// Owner color and name are denormalized from the owning session so that a
/// snapshot can be rendered without a join; they are rewritten on every cell
/// the owner holds when the profile changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub x: u32,
    pub y: u32,
    pub owner_id: String,
    pub owner_color: String,
    pub owner_name: Option<String>,
    pub claimed_at: DateTime<Utc>,
}

impl Cell {
    pub fn coord(&self) -> Coord {
        Coord::new(self.x, self.y)
    }
}
