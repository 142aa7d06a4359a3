//! Claim arbitration.
//!
//! The grid's check-and-set is the only place a winner is decided. The
//! caller holds the board lock for the whole call, so two claims on the same
//! coordinate are totally ordered and the second one always sees the first.

use chrono::{DateTime, Utc};
use gridclaim_core::{Cell, GridDimensions, UserRecord};

use crate::board::Board;
use crate::error::ClaimRejection;

/// An accepted claim and the owner's updated profile.
#[derive(Debug, Clone)]
pub struct Claimed {
    pub cell: Cell,
    pub owner: UserRecord,
}

#[derive(Debug, Clone, Copy)]
pub struct ClaimArbiter {
    dims: GridDimensions,
}

impl ClaimArbiter {
    pub fn new(dims: GridDimensions) -> Self {
        Self { dims }
    }

    pub fn dims(&self) -> GridDimensions {
        self.dims
    }

    pub fn claim(
        &self,
        board: &mut Board,
        session_id: &str,
        x: i64,
        y: i64,
        now: DateTime<Utc>,
    ) -> Result<Claimed, ClaimRejection> {
        let coord = self
            .dims
            .coord(x, y)
            .ok_or(ClaimRejection::OutOfBounds { x, y })?;

        let owner = board
            .sessions
            .get(session_id)
            .ok_or(ClaimRejection::UnknownSession)?;

        let cell = Cell {
            x: coord.x,
            y: coord.y,
            owner_id: owner.id.clone(),
            owner_color: owner.color.clone(),
            owner_name: owner.name.clone(),
            claimed_at: now,
        };

        if !board.grid.try_claim(cell.clone()) {
            return Err(ClaimRejection::AlreadyOwned { x, y });
        }

        // Same critical section as the insert above, so the session is
        // still registered.
        let owner = board
            .sessions
            .record_claim(session_id, now)
            .ok_or(ClaimRejection::UnknownSession)?;

        Ok(Claimed { cell, owner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridclaim_core::Coord;

    fn board_with(ids: &[&str]) -> Board {
        let mut board = Board::new();
        for id in ids {
            board
                .sessions
                .register_live(UserRecord::new(*id, "#FF6B6B"));
        }
        board
    }

    #[test]
    fn test_accepts_and_counts() {
        let arbiter = ClaimArbiter::new(GridDimensions::default());
        let mut board = board_with(&["a"]);

        let claimed = arbiter.claim(&mut board, "a", 5, 5, Utc::now()).unwrap();
        assert_eq!(claimed.cell.coord(), Coord::new(5, 5));
        assert_eq!(claimed.cell.owner_id, "a");
        assert_eq!(claimed.owner.blocks_claimed, 1);
        assert_eq!(board.grid.owned_by("a"), 1);
    }

    #[test]
    fn test_second_claim_loses() {
        let arbiter = ClaimArbiter::new(GridDimensions::default());
        let mut board = board_with(&["a", "b"]);

        arbiter.claim(&mut board, "a", 5, 5, Utc::now()).unwrap();
        let result = arbiter.claim(&mut board, "b", 5, 5, Utc::now());
        assert_eq!(result.unwrap_err(), ClaimRejection::AlreadyOwned { x: 5, y: 5 });

        // Re-claiming your own cell is also a conflict
        let result = arbiter.claim(&mut board, "a", 5, 5, Utc::now());
        assert!(matches!(result, Err(ClaimRejection::AlreadyOwned { .. })));

        assert_eq!(board.sessions.get("a").unwrap().blocks_claimed, 1);
        assert_eq!(board.sessions.get("b").unwrap().blocks_claimed, 0);
    }

    #[test]
    fn test_out_of_bounds_never_mutates() {
        let arbiter = ClaimArbiter::new(GridDimensions::default());
        let mut board = board_with(&["a"]);

        for (x, y) in [(40, 0), (0, 20), (-1, 0), (0, -1), (100, 100)] {
            let result = arbiter.claim(&mut board, "a", x, y, Utc::now());
            assert_eq!(result.unwrap_err(), ClaimRejection::OutOfBounds { x, y });
        }
        assert!(board.grid.is_empty());
        assert_eq!(board.sessions.get("a").unwrap().blocks_claimed, 0);
    }

    #[test]
    fn test_unknown_session_never_mutates() {
        let arbiter = ClaimArbiter::new(GridDimensions::default());
        let mut board = board_with(&[]);

        let result = arbiter.claim(&mut board, "ghost", 1, 1, Utc::now());
        assert_eq!(result.unwrap_err(), ClaimRejection::UnknownSession);
        assert!(board.grid.is_empty());
    }

    #[test]
    fn test_cell_carries_current_profile() {
        let arbiter = ClaimArbiter::new(GridDimensions::new(4, 4));
        let mut board = board_with(&["a"]);
        board.sessions.set_name("a", "Bob", Utc::now());

        let claimed = arbiter.claim(&mut board, "a", 3, 3, Utc::now()).unwrap();
        assert_eq!(claimed.cell.owner_name.as_deref(), Some("Bob"));
        assert_eq!(claimed.cell.owner_color, "#FF6B6B");

        let result = arbiter.claim(&mut board, "a", 4, 0, Utc::now());
        assert!(matches!(result, Err(ClaimRejection::OutOfBounds { .. })));
    }
}
