use async_trait::async_trait;
use gridclaim_core::{Cell, DurableSnapshot, DurableStore, OwnerFields, StorageError, UserRecord};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::client::D1Client;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS grid_cells (\
     x INTEGER NOT NULL, \
     y INTEGER NOT NULL, \
     owner_id TEXT NOT NULL, \
     owner_color TEXT NOT NULL, \
     owner_name TEXT, \
     claimed_at TEXT NOT NULL, \
     PRIMARY KEY (x, y))",
    "CREATE INDEX IF NOT EXISTS grid_cells_owner ON grid_cells (owner_id)",
    "CREATE TABLE IF NOT EXISTS grid_users (\
     id TEXT PRIMARY KEY, \
     name TEXT, \
     color TEXT NOT NULL, \
     blocks_claimed INTEGER NOT NULL DEFAULT 0, \
     last_active TEXT NOT NULL)",
];

/// `DurableStore` backed by a Cloudflare D1 database.
pub struct D1Store {
    client: D1Client,
}

impl D1Store {
    /// Wrap a client and make sure the schema exists.
    ///
    /// This is the first round-trip to D1, so a bad account, token or
    /// database id surfaces here.
    pub async fn connect(client: D1Client) -> Result<Self, StorageError> {
        for statement in SCHEMA {
            client.execute(statement, &[]).await?;
        }
        info!("D1 schema ready");
        Ok(Self { client })
    }

    fn parse_rows<T: DeserializeOwned>(rows: Vec<Value>, what: &str) -> Vec<T> {
        rows.into_iter()
            .filter_map(|row| match serde_json::from_value(row) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!("Failed to parse {} row: {}", what, e);
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl DurableStore for D1Store {
    fn backend_name(&self) -> &'static str {
        "d1"
    }

    #[instrument(skip(self), level = "debug")]
    async fn load(&self) -> Result<DurableSnapshot, StorageError> {
        let cell_rows = self
            .client
            .execute(
                "SELECT x, y, owner_id, owner_color, owner_name, claimed_at \
                 FROM grid_cells ORDER BY y, x",
                &[],
            )
            .await?;
        let user_rows = self
            .client
            .execute(
                "SELECT id, name, color, blocks_claimed, last_active \
                 FROM grid_users ORDER BY rowid",
                &[],
            )
            .await?;

        Ok(DurableSnapshot {
            cells: Self::parse_rows(cell_rows, "cell"),
            users: Self::parse_rows(user_rows, "user"),
        })
    }

    #[instrument(skip(self, cell), level = "debug", fields(x = cell.x, y = cell.y))]
    async fn put_cell(&self, cell: &Cell) -> Result<(), StorageError> {
        self.client
            .execute(
                "INSERT INTO grid_cells (x, y, owner_id, owner_color, owner_name, claimed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT (x, y) DO UPDATE SET \
                 owner_id = excluded.owner_id, \
                 owner_color = excluded.owner_color, \
                 owner_name = excluded.owner_name, \
                 claimed_at = excluded.claimed_at",
                &[
                    json!(cell.x),
                    json!(cell.y),
                    json!(cell.owner_id),
                    json!(cell.owner_color),
                    json!(cell.owner_name),
                    json!(cell.claimed_at.to_rfc3339()),
                ],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, user), level = "debug", fields(user_id = %user.id))]
    async fn put_user(&self, user: &UserRecord) -> Result<(), StorageError> {
        self.client
            .execute(
                "INSERT INTO grid_users (id, name, color, blocks_claimed, last_active) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT (id) DO UPDATE SET \
                 name = excluded.name, \
                 color = excluded.color, \
                 blocks_claimed = excluded.blocks_claimed, \
                 last_active = excluded.last_active",
                &[
                    json!(user.id),
                    json!(user.name),
                    json!(user.color),
                    json!(user.blocks_claimed),
                    json!(user.last_active.to_rfc3339()),
                ],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn update_owner_cells(
        &self,
        owner_id: &str,
        fields: &OwnerFields,
    ) -> Result<(), StorageError> {
        self.client
            .execute(
                "UPDATE grid_cells SET \
                 owner_color = COALESCE(?2, owner_color), \
                 owner_name = COALESCE(?3, owner_name) \
                 WHERE owner_id = ?1",
                &[json!(owner_id), json!(fields.color), json!(fields.name)],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_owner(&self, owner_id: &str) -> Result<(), StorageError> {
        self.client
            .execute(
                "DELETE FROM grid_cells WHERE owner_id = ?1",
                &[json!(owner_id)],
            )
            .await?;
        self.client
            .execute("DELETE FROM grid_users WHERE id = ?1", &[json!(owner_id)])
            .await?;
        Ok(())
    }
}
