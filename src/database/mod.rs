//! Persistence layer: SQLite via sqlx.
//!
//! Two pools back the store: a concurrent read pool and a serialized
//! write pool with a single connection. All mutations go through the
//! write pool so only one connection ever contends for the SQLite
//! write lock; readers stay concurrent under WAL.

pub mod models;
pub mod repositories;
pub mod time;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};

/// Database connection pool type alias.
pub type DbPool = Pool<Sqlite>;

/// Serialized write pool type alias (max_connections = 1).
pub type WritePool = Pool<Sqlite>;

const DEFAULT_POOL_SIZE: u32 = 10;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

/// Compute a sensible default read pool size based on available CPU cores.
///
/// SQLite readers don't benefit much beyond ~10 connections.
pub fn default_read_pool_size() -> u32 {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(2);
    (cores * 2).min(DEFAULT_POOL_SIZE)
}

/// Normalize a configured database URL into a sqlx SQLite URL.
///
/// Accepts `sqlite:path`, `sqlite3:path`, `file:path`, or a bare path.
pub fn normalize_database_url(database_url: &str) -> String {
    let trimmed = database_url.trim();
    let path = trimmed
        .strip_prefix("sqlite3:")
        .or_else(|| trimmed.strip_prefix("sqlite:"))
        .or_else(|| trimmed.strip_prefix("file:"))
        .unwrap_or(trimmed);

    if path.is_empty() || path == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite:{path}")
}

fn connect_options(database_url: &str) -> Result<SqliteConnectOptions, sqlx::Error> {
    Ok(SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
        .foreign_keys(true)
        .create_if_missing(true))
}

/// Initialize the read pool with the given size.
pub async fn init_pool_with_size(
    database_url: &str,
    max_connections: u32,
) -> Result<DbPool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(connect_options(database_url)?)
        .await?;

    tracing::info!(
        max_connections,
        "Read pool initialized with WAL journal mode"
    );

    Ok(pool)
}

/// Initialize the read pool with the default size.
pub async fn init_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    init_pool_with_size(database_url, default_read_pool_size()).await
}

/// Initialize the serialized write pool (`max_connections = 1`).
///
/// Writes queue through the single connection, so write contention is
/// eliminated at the source and monotonic status updates stay trivial.
pub async fn init_write_pool(database_url: &str) -> Result<WritePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(60))
        .connect_with(connect_options(database_url)?)
        .await?;

    tracing::info!("Write pool initialized with 1 max connection (serialized writes)");

    Ok(pool)
}

/// Run schema migrations. Additive-only; tolerates older databases.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_database_url() {
        assert_eq!(normalize_database_url("sqlite:data.db"), "sqlite:data.db");
        assert_eq!(normalize_database_url("sqlite3:./data.db"), "sqlite:./data.db");
        assert_eq!(normalize_database_url("file:/var/lib/vb.db"), "sqlite:/var/lib/vb.db");
        assert_eq!(normalize_database_url("data.db"), "sqlite:data.db");
        assert_eq!(normalize_database_url(""), "sqlite::memory:");
        assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    }

    #[tokio::test]
    async fn test_init_pool_in_memory() {
        let pool = init_write_pool("sqlite::memory:").await.unwrap();

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();

        // In-memory databases report "memory"; file-based would report "wal".
        assert!(result.0 == "memory" || result.0 == "wal");
    }
}
