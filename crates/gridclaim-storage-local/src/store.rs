use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use gridclaim_core::{Cell, DurableSnapshot, DurableStore, OwnerFields, StorageError, UserRecord};
use serde::de::DeserializeOwned;
use tokio::fs;
use tracing::{debug, instrument, warn};

const LOCK_FILE: &str = ".gridclaim.lock";
const CELLS_DIR: &str = "cells";
const USERS_DIR: &str = "users";

/// Local filesystem durable store.
///
/// Layout:
/// ```text
/// {root}/
///   .gridclaim.lock
///   cells/{x}_{y}.json
///   users/{id}.json
/// ```
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    /// Held for the lifetime of the store; the OS lock is released on drop.
    _lock: File,
}

impl LocalStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// Fails with `StorageError::Locked` if another process holds the
    /// directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        for dir in [root.join(CELLS_DIR), root.join(USERS_DIR)] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                StorageError::Io(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        let lock_path = root.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| {
                StorageError::Io(format!("Failed to open {}: {}", lock_path.display(), e))
            })?;
        lock.try_lock_exclusive()
            .map_err(|_| StorageError::Locked(root.display().to_string()))?;

        debug!("Opened local store at {}", root.display());
        Ok(Self { root, _lock: lock })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cell_path(&self, x: u32, y: u32) -> PathBuf {
        self.root.join(CELLS_DIR).join(format!("{}_{}.json", x, y))
    }

    fn user_path(&self, id: &str) -> Result<PathBuf, StorageError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::Backend(format!("Invalid user id: {:?}", id)));
        }
        Ok(self.root.join(USERS_DIR).join(format!("{}.json", id)))
    }

    /// Write via temp file + rename so readers never see a partial document.
    async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, data).await.map_err(|e| {
            StorageError::Io(format!(
                "Failed to write temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;
        fs::rename(&temp_path, path).await.map_err(|e| {
            StorageError::Io(format!(
                "Failed to rename temp file to {}: {}",
                path.display(),
                e
            ))
        })
    }

    async fn remove_if_exists(path: &Path) -> Result<(), StorageError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(format!(
                "Failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Read every `*.json` document in `dir`. Unparseable documents are
    /// skipped with a warning.
    async fn read_all<T: DeserializeOwned>(dir: &Path) -> Result<Vec<(PathBuf, T)>, StorageError> {
        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| StorageError::Io(format!("Failed to read {}: {}", dir.display(), e)))?;

        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::Io(format!("Failed to read {}: {}", dir.display(), e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).await.map_err(|e| {
                StorageError::Io(format!("Failed to read {}: {}", path.display(), e))
            })?;
            match serde_json::from_slice(&bytes) {
                Ok(doc) => out.push((path, doc)),
                Err(e) => warn!("Skipping unreadable document {}: {}", path.display(), e),
            }
        }
        Ok(out)
    }

    async fn owned_cells(&self, owner_id: &str) -> Result<Vec<(PathBuf, Cell)>, StorageError> {
        let cells = Self::read_all::<Cell>(&self.root.join(CELLS_DIR)).await?;
        Ok(cells
            .into_iter()
            .filter(|(_, c)| c.owner_id == owner_id)
            .collect())
    }
}

#[async_trait]
impl DurableStore for LocalStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    #[instrument(skip(self), level = "debug")]
    async fn load(&self) -> Result<DurableSnapshot, StorageError> {
        let mut cells: Vec<Cell> = Self::read_all::<Cell>(&self.root.join(CELLS_DIR))
            .await?
            .into_iter()
            .map(|(_, c)| c)
            .collect();
        cells.sort_by_key(|c| (c.y, c.x));

        let mut users: Vec<UserRecord> = Self::read_all::<UserRecord>(&self.root.join(USERS_DIR))
            .await?
            .into_iter()
            .map(|(_, u)| u)
            .collect();
        users.sort_by_key(|u| u.last_active);

        debug!(
            "Loaded {} cells and {} users from {}",
            cells.len(),
            users.len(),
            self.root.display()
        );
        Ok(DurableSnapshot { cells, users })
    }

    #[instrument(skip(self, cell), level = "debug", fields(x = cell.x, y = cell.y))]
    async fn put_cell(&self, cell: &Cell) -> Result<(), StorageError> {
        let data = serde_json::to_vec(cell)?;
        Self::write_atomic(&self.cell_path(cell.x, cell.y), &data).await
    }

    #[instrument(skip(self, user), level = "debug", fields(user_id = %user.id))]
    async fn put_user(&self, user: &UserRecord) -> Result<(), StorageError> {
        let path = self.user_path(&user.id)?;
        let data = serde_json::to_vec(user)?;
        Self::write_atomic(&path, &data).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn update_owner_cells(
        &self,
        owner_id: &str,
        fields: &OwnerFields,
    ) -> Result<(), StorageError> {
        for (path, mut cell) in self.owned_cells(owner_id).await? {
            fields.apply_to_cell(&mut cell);
            let data = serde_json::to_vec(&cell)?;
            Self::write_atomic(&path, &data).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_owner(&self, owner_id: &str) -> Result<(), StorageError> {
        let owned = self.owned_cells(owner_id).await?;
        let count = owned.len();
        for (path, _) in owned {
            Self::remove_if_exists(&path).await?;
        }
        Self::remove_if_exists(&self.user_path(owner_id)?).await?;
        debug!("Deleted {} cells and user record for {}", count, owner_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn setup() -> (LocalStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    fn cell(x: u32, y: u32, owner: &str) -> Cell {
        Cell {
            x,
            y,
            owner_id: owner.to_string(),
            owner_color: "#FF6B6B".to_string(),
            owner_name: None,
            claimed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_put_and_load() {
        let (store, _temp_dir) = setup();

        store.put_cell(&cell(3, 1, "user-a")).await.unwrap();
        store.put_cell(&cell(1, 1, "user-a")).await.unwrap();
        let mut user = UserRecord::new("user-a", "#FF6B6B");
        user.blocks_claimed = 2;
        store.put_user(&user).await.unwrap();

        let snapshot = store.load().await.unwrap();
        assert_eq!(snapshot.cells.len(), 2);
        assert_eq!((snapshot.cells[0].x, snapshot.cells[0].y), (1, 1));
        assert_eq!(snapshot.users, vec![user]);
    }

    #[tokio::test]
    async fn test_put_cell_overwrites() {
        let (store, _temp_dir) = setup();

        store.put_cell(&cell(0, 0, "user-a")).await.unwrap();
        store.put_cell(&cell(0, 0, "user-b")).await.unwrap();

        let snapshot = store.load().await.unwrap();
        assert_eq!(snapshot.cells.len(), 1);
        assert_eq!(snapshot.cells[0].owner_id, "user-b");
    }

    #[tokio::test]
    async fn test_delete_owner() {
        let (store, _temp_dir) = setup();

        for (x, y) in [(1, 1), (2, 2), (3, 3)] {
            store.put_cell(&cell(x, y, "user-a")).await.unwrap();
        }
        store.put_cell(&cell(4, 4, "user-b")).await.unwrap();
        store
            .put_user(&UserRecord::new("user-a", "#FF6B6B"))
            .await
            .unwrap();
        store
            .put_user(&UserRecord::new("user-b", "#FF6B6B"))
            .await
            .unwrap();

        store.delete_owner("user-a").await.unwrap();

        let snapshot = store.load().await.unwrap();
        assert_eq!(snapshot.cells.len(), 1);
        assert_eq!(snapshot.cells[0].owner_id, "user-b");
        assert_eq!(snapshot.users.len(), 1);
        assert_eq!(snapshot.users[0].id, "user-b");

        // Deleting an owner with nothing stored is not an error
        store.delete_owner("user-a").await.unwrap();
    }

    #[tokio::test]
    async fn test_update_owner_cells() {
        let (store, _temp_dir) = setup();

        store.put_cell(&cell(1, 1, "user-a")).await.unwrap();
        store.put_cell(&cell(2, 2, "user-b")).await.unwrap();

        let fields = OwnerFields {
            color: Some("#16A085".to_string()),
            name: Some("Alice".to_string()),
        };
        store.update_owner_cells("user-a", &fields).await.unwrap();

        let snapshot = store.load().await.unwrap();
        let a = snapshot.cells.iter().find(|c| c.owner_id == "user-a").unwrap();
        assert_eq!(a.owner_color, "#16A085");
        assert_eq!(a.owner_name.as_deref(), Some("Alice"));
        let b = snapshot.cells.iter().find(|c| c.owner_id == "user-b").unwrap();
        assert_eq!(b.owner_color, "#FF6B6B");
        assert!(b.owner_name.is_none());
    }

    #[tokio::test]
    async fn test_reject_path_like_user_id() {
        let (store, _temp_dir) = setup();

        let result = store
            .put_user(&UserRecord::new("../escape", "#FF6B6B"))
            .await;
        assert!(matches!(result, Err(StorageError::Backend(_))));
    }

    #[tokio::test]
    async fn test_skips_temp_and_corrupt_files() {
        let (store, _temp_dir) = setup();

        store.put_cell(&cell(1, 1, "user-a")).await.unwrap();
        std::fs::write(store.root().join(CELLS_DIR).join("2_2.json.tmp"), b"{}").unwrap();
        std::fs::write(store.root().join(CELLS_DIR).join("3_3.json"), b"not json").unwrap();

        let snapshot = store.load().await.unwrap();
        assert_eq!(snapshot.cells.len(), 1);
    }

    #[test]
    fn test_directory_lock_is_exclusive() {
        let temp_dir = TempDir::new().unwrap();
        let _first = LocalStore::open(temp_dir.path()).unwrap();

        let second = LocalStore::open(temp_dir.path());
        assert!(matches!(second, Err(StorageError::Locked(_))));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(temp_dir.path()).unwrap();
        tokio_test::block_on(store.put_cell(&cell(5, 5, "user-a"))).unwrap();
        drop(store);

        let reopened = LocalStore::open(temp_dir.path()).unwrap();
        let snapshot = tokio_test::block_on(reopened.load()).unwrap();
        assert_eq!(snapshot.cells.len(), 1);
    }
}
