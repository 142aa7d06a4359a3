use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cell::{Cell, Coord};
use crate::error::StorageError;
use crate::store::{DurableSnapshot, DurableStore, OwnerFields};
use crate::user::UserRecord;

#[derive(Debug, Default)]
struct MemoryState {
    cells: BTreeMap<Coord, Cell>,
    /// Insertion order is kept so `load` yields users in arrival order.
    users: Vec<UserRecord>,
}

/// Process-local `DurableStore`. Nothing survives a restart; useful for
/// tests and throwaway deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    failures: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store as if a previous process had written to it.
    pub fn with_snapshot(snapshot: DurableSnapshot) -> Self {
        let store = Self::new();
        {
            let mut state = store.lock();
            for cell in snapshot.cells {
                state.cells.insert(cell.coord(), cell);
            }
            state.users = snapshot.users;
        }
        store
    }

    /// Make the next `count` write operations fail with an I/O error.
    pub fn inject_failures(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn cell_count(&self) -> usize {
        self.lock().cells.len()
    }

    pub fn user(&self, id: &str) -> Option<UserRecord> {
        self.lock().users.iter().find(|u| u.id == id).cloned()
    }

    pub fn cell(&self, coord: Coord) -> Option<Cell> {
        self.lock().cells.get(&coord).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_failure(&self) -> Result<(), StorageError> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(StorageError::Io("injected failure".to_string())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self) -> Result<DurableSnapshot, StorageError> {
        let state = self.lock();
        Ok(DurableSnapshot {
            cells: state.cells.values().cloned().collect(),
            users: state.users.clone(),
        })
    }

    async fn put_cell(&self, cell: &Cell) -> Result<(), StorageError> {
        self.check_failure()?;
        self.lock().cells.insert(cell.coord(), cell.clone());
        Ok(())
    }

    async fn put_user(&self, user: &UserRecord) -> Result<(), StorageError> {
        self.check_failure()?;
        let mut state = self.lock();
        match state.users.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => *existing = user.clone(),
            None => state.users.push(user.clone()),
        }
        Ok(())
    }

    async fn update_owner_cells(
        &self,
        owner_id: &str,
        fields: &OwnerFields,
    ) -> Result<(), StorageError> {
        self.check_failure()?;
        let mut state = self.lock();
        for cell in state.cells.values_mut().filter(|c| c.owner_id == owner_id) {
            fields.apply_to_cell(cell);
        }
        Ok(())
    }

    async fn delete_owner(&self, owner_id: &str) -> Result<(), StorageError> {
        self.check_failure()?;
        let mut state = self.lock();
        state.cells.retain(|_, c| c.owner_id != owner_id);
        state.users.retain(|u| u.id != owner_id);
        Ok(())
    }
}
