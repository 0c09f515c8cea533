//! SQLite connection pool and schema bootstrap.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use engine::StoreError;

/// Type alias for the shared SQLite pool used across the whole application.
pub type DbPool = SqlitePool;

/// Embedded schema, applied idempotently on startup.
const SCHEMA: &str = include_str!("schema.sql");

/// Create a connection pool for the given `database_url`
/// (e.g. `sqlite://nodeflow.db` or `sqlite::memory:`) and apply the schema.
///
/// For in-memory databases use `max_connections = 1`: every SQLite
/// `:memory:` connection is its own database.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, StoreError> {
    info!(database_url, max_connections, "connecting to database");

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| StoreError::Backend(e.to_string()))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

    sqlx::raw_sql(SCHEMA)
        .execute(&pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

    Ok(pool)
}
