use gridclaim_core::{leaderboard, Stats};

use crate::grid::GridStore;
use crate::registry::SessionRegistry;

/// The shared mutable state: grid and registry, always locked together so
/// that `blocks_claimed` and the owner index never drift apart.
#[derive(Debug, Default)]
pub struct Board {
    pub(crate) grid: GridStore,
    pub(crate) sessions: SessionRegistry,
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grid(&self) -> &GridStore {
        &self.grid
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Aggregate stats as of this instant.
    pub fn stats(&self) -> Stats {
        Stats {
            total_blocks_claimed: self.grid.len(),
            total_users: self.sessions.total(),
            leaderboard: leaderboard(self.sessions.in_arrival_order()),
        }
    }
}
