//! Id-keyed JSON record store for [`ClientInfo`].

use std::sync::Arc;

use chrono::Utc;

use crate::models::client::ClientInfo;
use crate::{AppError, Result};

use super::db::Database;

/// Repository for persisted client records.
#[derive(Clone, Debug)]
pub struct ClientRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct ClientRow {
    id: String,
    data: String,
}

impl ClientRow {
    fn into_client(self) -> Result<ClientInfo> {
        serde_json::from_str(&self.data)
            .map_err(|err| AppError::Db(format!("invalid client record {}: {err}", self.id)))
    }
}

impl ClientRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace a client record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if serialization or the upsert fails.
    pub async fn write(&self, client: &ClientInfo) -> Result<()> {
        let data = serde_json::to_string(client)
            .map_err(|err| AppError::Db(format!("failed to serialize client: {err}")))?;

        sqlx::query(
            "INSERT INTO client (id, client_type, data, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                client_type = excluded.client_type,
                data = excluded.data,
                updated_at = excluded.updated_at",
        )
        .bind(&client.id)
        .bind(client.client_type.as_str())
        .bind(&data)
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Read one client record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or the record is corrupt.
    pub async fn read(&self, id: &str) -> Result<Option<ClientInfo>> {
        let row: Option<ClientRow> = sqlx::query_as("SELECT id, data FROM client WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(ClientRow::into_client).transpose()
    }

    /// Delete one client record. Deleting a missing id is not an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM client WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// List every persisted client record.
    ///
    /// Corrupt records are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self) -> Result<Vec<ClientInfo>> {
        let rows: Vec<ClientRow> = sqlx::query_as("SELECT id, data FROM client ORDER BY id")
            .fetch_all(self.db.as_ref())
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match row.into_client() {
                Ok(client) => Some(client),
                Err(err) => {
                    tracing::warn!(%err, "skipping corrupt client record");
                    None
                }
            })
            .collect())
    }
}
