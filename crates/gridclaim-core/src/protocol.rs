//! JSON session protocol, discriminated by the `type` field.

use serde::{Deserialize, Serialize};

use crate::cell::{Cell, Coord};
use crate::stats::Stats;

/// Requests a session may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Coordinates stay signed so negative values reach bounds validation
    /// instead of failing as malformed input.
    ClaimBlock { x: i64, y: i64 },
    UpdateName { name: String },
    UpdateColor { color: String },
}

/// Events the server emits, either to one session or to all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    Init {
        session_id: String,
        color: String,
        blocks: Vec<Cell>,
        stats: Stats,
        connected_sessions: usize,
    },
    BlockClaimed {
        block: Cell,
    },
    ClaimFailed {
        x: i64,
        y: i64,
        message: String,
    },
    Error {
        message: String,
    },
    NameUpdated {
        name: String,
    },
    UserColorUpdated {
        session_id: String,
        color: String,
    },
    StatsUpdate {
        stats: Stats,
    },
    BlocksCleared {
        blocks: Vec<Coord>,
    },
    UserCount {
        count: usize,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}
