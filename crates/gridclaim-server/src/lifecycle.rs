//! Session lifecycle: connect, and the cleanup that runs exactly once when
//! a session ends.
//!
//! `connect` hands out a `SessionLease`. The lease is the only way to act as
//! a session, and dropping it releases the session's cells. At shutdown
//! `disconnect_all` runs the same teardown for every session still open;
//! teardown is a no-op for a session that is already gone, so cleanup runs
//! exactly once however the session ends.

use std::sync::Arc;

use gridclaim_core::{palette, ClientMessage, Coord, ServerMessage, UserRecord};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::engine::ClaimEngine;
use crate::hub::Outbound;

/// A connected session. Cleanup runs when this is dropped.
pub struct SessionLease {
    engine: Arc<ClaimEngine>,
    session_id: String,
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl SessionLease {
    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn engine(&self) -> &Arc<ClaimEngine> {
        &self.engine
    }

    pub fn handle(&self, msg: ClientMessage) {
        self.engine.handle(&self.session_id, msg);
    }

    pub fn reject_malformed(&self, reason: &str) {
        self.engine.reject_malformed(&self.session_id, reason);
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.engine.teardown(&self.session_id);
    }
}

impl ClaimEngine {
    /// Register a new session and queue its `init` message.
    ///
    /// The returned receiver yields every event addressed to the session,
    /// starting with `init`. Everyone else learns the new session count.
    pub fn connect(self: &Arc<Self>) -> (SessionLease, mpsc::Receiver<Outbound>) {
        let session_id = Uuid::new_v4().to_string();
        let color = palette::random_color();

        let mut board = self.board();
        let record = UserRecord::new(session_id.clone(), color);
        board.sessions.register_live(record.clone());
        let rx = self.hub.register(&session_id, self.outbound_buffer);

        let connected = board.sessions.live_count();
        self.hub.send_to(
            &session_id,
            &ServerMessage::Init {
                session_id: session_id.clone(),
                color: color.to_string(),
                blocks: board.grid.snapshot(),
                stats: board.stats(),
                connected_sessions: connected,
            },
        );
        self.bridge.persist_session_upsert(record);
        self.hub
            .broadcast(&ServerMessage::UserCount { count: connected });
        drop(board);

        info!(session_id = %session_id, connected, "Session connected");
        (
            SessionLease {
                engine: Arc::clone(self),
                session_id,
            },
            rx,
        )
    }

    /// End every live session: release its cells, forget it and queue the
    /// durable release. Their leases become inert and drop as no-ops.
    ///
    /// Run at shutdown before the persistence bridge drains, so no session's
    /// ownership outlives the process. Returns the number of sessions ended.
    pub fn disconnect_all(&self) -> usize {
        let live = self.board().sessions.live_ids();
        live.iter()
            .filter(|session_id| self.teardown(session_id.as_str()))
            .count()
    }

    /// Release everything `session_id` owns and forget the session.
    /// Returns false if the session was already gone.
    fn teardown(&self, session_id: &str) -> bool {
        let mut board = self.board();
        if !board.sessions.is_live(session_id) {
            return false;
        }
        let released = board.grid.release_all(session_id);
        board.sessions.remove(session_id);
        self.hub.unregister(session_id);
        self.bridge.persist_release(session_id);

        if !released.is_empty() {
            let blocks: Vec<Coord> = released.iter().map(|cell| cell.coord()).collect();
            self.hub.broadcast(&ServerMessage::BlocksCleared { blocks });
            self.hub.broadcast(&ServerMessage::StatsUpdate {
                stats: board.stats(),
            });
        }
        let connected = board.sessions.live_count();
        self.hub
            .broadcast(&ServerMessage::UserCount { count: connected });
        drop(board);

        info!(
            session_id,
            released = released.len(),
            connected,
            "Session disconnected"
        );
        true
    }
}
