use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cell::Cell;
use crate::error::StorageError;
use crate::user::UserRecord;

/// Owner fields to rewrite on a profile change. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OwnerFields {
    pub color: Option<String>,
    pub name: Option<String>,
}

impl OwnerFields {
    pub fn color(color: impl Into<String>) -> Self {
        Self {
            color: Some(color.into()),
            name: None,
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self {
            color: None,
            name: Some(name.into()),
        }
    }

    pub fn apply_to_cell(&self, cell: &mut Cell) {
        if let Some(color) = &self.color {
            cell.owner_color = color.clone();
        }
        if let Some(name) = &self.name {
            cell.owner_name = Some(name.clone());
        }
    }
}

/// Everything a durable store holds, read once at startup.
#[derive(Debug, Clone, Default)]
pub struct DurableSnapshot {
    pub cells: Vec<Cell>,
    pub users: Vec<UserRecord>,
}

/// Durable mirror of the in-memory grid and session registry.
///
/// Writes are idempotent so the persistence worker can retry them: cells and
/// users are stored as whole records keyed by coordinate and by id.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Short backend name used in logs and health output.
    fn backend_name(&self) -> &'static str;

    /// Read the complete durable state.
    async fn load(&self) -> Result<DurableSnapshot, StorageError>;

    /// Insert or overwrite the cell at `(cell.x, cell.y)`.
    async fn put_cell(&self, cell: &Cell) -> Result<(), StorageError>;

    /// Insert or overwrite a user record.
    async fn put_user(&self, user: &UserRecord) -> Result<(), StorageError>;

    /// Rewrite denormalized owner fields on every cell owned by `owner_id`.
    async fn update_owner_cells(
        &self,
        owner_id: &str,
        fields: &OwnerFields,
    ) -> Result<(), StorageError>;

    /// Remove every cell owned by `owner_id` and the owner's user record.
    async fn delete_owner(&self, owner_id: &str) -> Result<(), StorageError>;
}
