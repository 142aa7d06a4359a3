//! Session registry: every known user profile, live or restored.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use gridclaim_core::UserRecord;

#[derive(Debug)]
struct Entry {
    record: UserRecord,
    /// Registration sequence number; ties on the leaderboard go to the
    /// lower value.
    arrival: u64,
    /// Backed by an open connection (as opposed to restored from storage).
    live: bool,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: HashMap<String, Entry>,
    next_arrival: u64,
    live: usize,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session backed by a live connection.
    pub fn register_live(&mut self, record: UserRecord) {
        self.insert(record, true);
    }

    /// Register a user record read back from durable storage.
    pub fn restore(&mut self, record: UserRecord) {
        self.insert(record, false);
    }

    fn insert(&mut self, record: UserRecord, live: bool) {
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        if live {
            self.live += 1;
        }
        let previous = self.entries.insert(
            record.id.clone(),
            Entry {
                record,
                arrival,
                live,
            },
        );
        if let Some(previous) = previous {
            if previous.live {
                self.live -= 1;
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&UserRecord> {
        self.entries.get(id).map(|e| &e.record)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.entries.get(id).is_some_and(|e| e.live)
    }

    /// Count one more owned cell for `id` and return the updated record.
    pub fn record_claim(&mut self, id: &str, at: DateTime<Utc>) -> Option<UserRecord> {
        let entry = self.entries.get_mut(id)?;
        entry.record.blocks_claimed += 1;
        entry.record.last_active = entry.record.last_active.max(at);
        Some(entry.record.clone())
    }

    pub fn set_name(&mut self, id: &str, name: &str, at: DateTime<Utc>) -> Option<UserRecord> {
        let entry = self.entries.get_mut(id)?;
        entry.record.name = Some(name.to_string());
        entry.record.last_active = at;
        Some(entry.record.clone())
    }

    pub fn set_color(&mut self, id: &str, color: &str, at: DateTime<Utc>) -> Option<UserRecord> {
        let entry = self.entries.get_mut(id)?;
        entry.record.color = color.to_string();
        entry.record.last_active = at;
        Some(entry.record.clone())
    }

    /// Reset every claim counter. Used before recounting restored cells.
    pub(crate) fn reset_claim_counts(&mut self) {
        for entry in self.entries.values_mut() {
            entry.record.blocks_claimed = 0;
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<UserRecord> {
        let entry = self.entries.remove(id)?;
        if entry.live {
            self.live -= 1;
        }
        Some(entry.record)
    }

    /// Sessions with an open connection.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Ids of the sessions with an open connection.
    pub fn live_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.live)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// All known users, live or restored.
    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn in_arrival_order(&self) -> Vec<&UserRecord> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.arrival);
        entries.into_iter().map(|e| &e.record).collect()
    }
}
