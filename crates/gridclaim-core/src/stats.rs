use serde::{Deserialize, Serialize};

use crate::user::UserRecord;

/// Number of entries kept on the leaderboard.
pub const LEADERBOARD_SIZE: usize = 10;

/// Aggregate statistics, derived on demand from the grid and the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_blocks_claimed: usize,
    pub total_users: usize,
    pub leaderboard: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub id: String,
    pub color: String,
    pub name: Option<String>,
    pub blocks_claimed: u32,
}

impl From<&UserRecord> for LeaderboardEntry {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id.clone(),
            color: user.color.clone(),
            name: user.name.clone(),
            blocks_claimed: user.blocks_claimed,
        }
    }
}

/// Top `LEADERBOARD_SIZE` users with at least one claim, by claim count
/// descending.
///
/// `users` must be yielded in arrival order: the sort is stable, so ties keep
/// the earlier arrival first.
pub fn leaderboard<'a>(users: impl IntoIterator<Item = &'a UserRecord>) -> Vec<LeaderboardEntry> {
    let mut ranked: Vec<&UserRecord> = users
        .into_iter()
        .filter(|u| u.blocks_claimed > 0)
        .collect();
    ranked.sort_by(|a, b| b.blocks_claimed.cmp(&a.blocks_claimed));
    ranked
        .into_iter()
        .take(LEADERBOARD_SIZE)
        .map(LeaderboardEntry::from)
        .collect()
}
