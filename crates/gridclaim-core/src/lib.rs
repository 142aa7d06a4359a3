//! Core types and traits for the gridclaim real-time grid.
//!
//! This crate defines what is shared between the server and the durable
//! store backends:
//! - `Cell`, `Coord`, `GridDimensions`: the grid and its ownership records
//! - `UserRecord`, `Stats`: session profiles and derived aggregates
//! - `ClientMessage` / `ServerMessage`: the JSON session protocol
//! - `DurableStore`: the write-through persistence abstraction

mod cell;
mod error;
mod memory;
pub mod palette;
mod protocol;
mod stats;
mod store;
mod user;

pub use cell::{Cell, Coord, GridDimensions};
pub use error::StorageError;
pub use memory::MemoryStore;
pub use protocol::{ClientMessage, ServerMessage};
pub use stats::{leaderboard, LeaderboardEntry, Stats, LEADERBOARD_SIZE};
pub use store::{DurableSnapshot, DurableStore, OwnerFields};
pub use user::{UserRecord, MAX_NAME_LEN};
