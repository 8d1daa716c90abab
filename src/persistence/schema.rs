//! `SQLite` schema bootstrap logic.
//!
//! Uses `CREATE TABLE IF NOT EXISTS`, so it is safe to re-run on every
//! startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply the client table definition.
///
/// # Errors
///
/// Returns `AppError::Db` if the DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS client (
    id              TEXT PRIMARY KEY NOT NULL,
    client_type     TEXT NOT NULL CHECK(client_type IN ('claude','cline','other')),
    data            TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_client_type ON client(client_type);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
