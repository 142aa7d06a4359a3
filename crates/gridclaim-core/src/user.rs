use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum display name length, in characters.
pub const MAX_NAME_LEN: usize = 20;

/// Profile of one session as stored in memory and mirrored durably.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub name: Option<String>,
    pub color: String,
    pub blocks_claimed: u32,
    pub last_active: DateTime<Utc>,
}

impl UserRecord {
    /// A fresh, unnamed session with no claims.
    pub fn new(id: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            color: color.into(),
            blocks_claimed: 0,
            last_active: Utc::now(),
        }
    }

    /// Normalize a requested display name: trimmed, at most
    /// `MAX_NAME_LEN` characters, `None` when nothing is left.
    pub fn normalize_name(raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(trimmed.chars().take(MAX_NAME_LEN).collect())
    }
}
