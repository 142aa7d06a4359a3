//! The synchronization engine: one lock around the board, with broadcast
//! and persistence fed from inside the critical section.
//!
//! Every mutation enqueues its events and its durable write before the lock
//! is released. Both enqueues are non-blocking, and doing them under the
//! lock makes delivery order and persistence order equal commit order
//! (a claim's write can never land after the owner's release).

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use gridclaim_core::{
    palette, Cell, ClientMessage, Coord, DurableSnapshot, GridDimensions, OwnerFields,
    ServerMessage, Stats, UserRecord,
};
use tracing::{debug, info, warn};

use crate::arbiter::ClaimArbiter;
use crate::board::Board;
use crate::bridge::{BridgeMetrics, PersistenceBridge};
use crate::error::{ClaimRejection, ProfileError};
use crate::hub::BroadcastHub;

/// Default capacity of each session's outbound queue.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

pub struct ClaimEngine {
    board: Mutex<Board>,
    arbiter: ClaimArbiter,
    pub(crate) hub: BroadcastHub,
    pub(crate) bridge: PersistenceBridge,
    pub(crate) outbound_buffer: usize,
}

/// What `restore` loaded from durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreSummary {
    pub cells: usize,
    pub users: usize,
    pub skipped_cells: usize,
}

impl ClaimEngine {
    pub fn new(dims: GridDimensions, bridge: PersistenceBridge, outbound_buffer: usize) -> Self {
        Self {
            board: Mutex::new(Board::new()),
            arbiter: ClaimArbiter::new(dims),
            hub: BroadcastHub::new(),
            bridge,
            outbound_buffer,
        }
    }

    /// Lock the board. A panic elsewhere must not wedge the grid, so a
    /// poisoned lock is recovered rather than propagated.
    pub(crate) fn board(&self) -> MutexGuard<'_, Board> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn dims(&self) -> GridDimensions {
        self.arbiter.dims()
    }

    /// Load durable state into memory. Called once, before serving.
    ///
    /// Claim counters are recomputed from the loaded cells; a cell whose
    /// owner has no user record gets one rebuilt from the cell's owner
    /// fields.
    pub fn restore(&self, snapshot: DurableSnapshot) -> RestoreSummary {
        let mut board = self.board();
        let dims = self.dims();

        for user in snapshot.users {
            board.sessions.restore(user);
        }
        board.sessions.reset_claim_counts();

        let mut skipped_cells = 0;
        for cell in snapshot.cells {
            if !dims.contains(cell.coord()) {
                warn!(x = cell.x, y = cell.y, "Skipping stored cell outside the grid");
                skipped_cells += 1;
                continue;
            }
            if !board.sessions.contains(&cell.owner_id) {
                let mut owner = UserRecord::new(cell.owner_id.clone(), cell.owner_color.clone());
                owner.name = cell.owner_name.clone();
                owner.last_active = cell.claimed_at;
                board.sessions.restore(owner);
            }
            let owner_id = cell.owner_id.clone();
            let claimed_at = cell.claimed_at;
            if board.grid.try_claim(cell) {
                board.sessions.record_claim(&owner_id, claimed_at);
            } else {
                warn!("Skipping duplicate stored cell for owner {}", owner_id);
                skipped_cells += 1;
            }
        }

        let summary = RestoreSummary {
            cells: board.grid.len(),
            users: board.sessions.total(),
            skipped_cells,
        };
        info!(
            "Restored {} cells and {} users ({} skipped)",
            summary.cells, summary.users, summary.skipped_cells
        );
        summary
    }

    /// Dispatch one inbound message from `session_id`. Rejections are
    /// answered to that session only.
    pub fn handle(&self, session_id: &str, msg: ClientMessage) {
        debug!(session_id, ?msg, "Handling message");
        match msg {
            ClientMessage::ClaimBlock { x, y } => match self.claim(session_id, x, y) {
                Ok(_) => {}
                Err(rejection @ ClaimRejection::OutOfBounds { .. }) => {
                    self.hub
                        .send_to(session_id, &ServerMessage::error(rejection.to_string()));
                }
                Err(rejection @ ClaimRejection::AlreadyOwned { x, y }) => {
                    self.hub.send_to(
                        session_id,
                        &ServerMessage::ClaimFailed {
                            x,
                            y,
                            message: rejection.to_string(),
                        },
                    );
                }
                Err(ClaimRejection::UnknownSession) => {
                    warn!(session_id, "Claim from unregistered session ignored");
                }
            },
            ClientMessage::UpdateName { name } => {
                if let Err(e) = self.update_name(session_id, &name) {
                    self.hub.send_to(session_id, &ServerMessage::error(e.to_string()));
                }
            }
            ClientMessage::UpdateColor { color } => {
                if let Err(e) = self.update_color(session_id, &color) {
                    self.hub.send_to(session_id, &ServerMessage::error(e.to_string()));
                }
            }
        }
    }

    /// Answer a frame that did not parse as a `ClientMessage`.
    pub fn reject_malformed(&self, session_id: &str, reason: &str) {
        debug!(session_id, reason, "Malformed message");
        self.hub
            .send_to(session_id, &ServerMessage::error("Malformed message"));
    }

    /// Claim `(x, y)` for `session_id`.
    ///
    /// On success the cell is broadcast to everyone together with fresh
    /// stats, and the claim is queued for persistence.
    pub fn claim(&self, session_id: &str, x: i64, y: i64) -> Result<Cell, ClaimRejection> {
        let mut board = self.board();
        let claimed = self
            .arbiter
            .claim(&mut board, session_id, x, y, Utc::now())?;

        self.bridge
            .persist_claim(claimed.cell.clone(), claimed.owner);
        self.hub.broadcast(&ServerMessage::BlockClaimed {
            block: claimed.cell.clone(),
        });
        self.hub.broadcast(&ServerMessage::StatsUpdate {
            stats: board.stats(),
        });

        debug!(session_id, x, y, "Block claimed");
        Ok(claimed.cell)
    }

    /// Set the display name of `session_id`; returns the normalized name.
    pub fn update_name(&self, session_id: &str, raw: &str) -> Result<String, ProfileError> {
        let name = UserRecord::normalize_name(raw).ok_or(ProfileError::EmptyName)?;

        let mut board = self.board();
        let owner = board
            .sessions
            .set_name(session_id, &name, Utc::now())
            .ok_or(ProfileError::UnknownSession)?;
        let fields = OwnerFields::name(name.clone());
        board.grid.update_owner_fields(session_id, &fields);

        self.bridge.persist_owner_update(session_id, fields, owner);
        self.hub
            .send_to(session_id, &ServerMessage::NameUpdated { name: name.clone() });
        self.hub.broadcast(&ServerMessage::StatsUpdate {
            stats: board.stats(),
        });

        debug!(session_id, name = %name, "Name updated");
        Ok(name)
    }

    /// Set the color of `session_id`. Only palette members are accepted.
    pub fn update_color(&self, session_id: &str, color: &str) -> Result<(), ProfileError> {
        if !palette::contains(color) {
            return Err(ProfileError::InvalidColor);
        }

        let mut board = self.board();
        let owner = board
            .sessions
            .set_color(session_id, color, Utc::now())
            .ok_or(ProfileError::UnknownSession)?;
        let fields = OwnerFields::color(color);
        board.grid.update_owner_fields(session_id, &fields);

        self.bridge.persist_owner_update(session_id, fields, owner);
        self.hub.broadcast(&ServerMessage::UserColorUpdated {
            session_id: session_id.to_string(),
            color: color.to_string(),
        });
        self.hub.broadcast(&ServerMessage::StatsUpdate {
            stats: board.stats(),
        });

        debug!(session_id, color, "Color updated");
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<Cell> {
        self.board().grid.snapshot()
    }

    pub fn cell(&self, coord: Coord) -> Option<Cell> {
        self.board().grid.get(coord).cloned()
    }

    pub fn stats(&self) -> Stats {
        self.board().stats()
    }

    pub fn user(&self, session_id: &str) -> Option<UserRecord> {
        self.board().sessions.get(session_id).cloned()
    }

    pub fn live_sessions(&self) -> usize {
        self.board().sessions.live_count()
    }

    pub fn persistence(&self) -> BridgeMetrics {
        self.bridge.metrics()
    }

    pub fn persistence_backend(&self) -> &'static str {
        self.bridge.backend()
    }

    /// Events dropped because a session's outbound queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.hub.dropped()
    }

    /// Wait until the persistence queue is empty.
    pub async fn persisted(&self) {
        self.bridge.wait_idle().await
    }
}
