use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use ticketdesk_core::config::DatabaseConfig;
use tracing::debug;

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

/// Opens a pool, creating the database file when it does not exist yet.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let in_memory = database_url.contains(":memory:");
    let mut options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    debug!(database_url, max_connections, in_memory, "opening sqlite pool");
    SqlitePoolOptions::new()
        // every in-memory connection is its own database
        .max_connections(if in_memory { 1 } else { max_connections.max(1) })
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .connect_with(options)
        .await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;
    use tempfile::TempDir;

    use super::connect_with_settings;

    #[tokio::test]
    async fn file_database_is_created_with_foreign_keys_on() {
        let dir = TempDir::new().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("tickets.db").display());

        let pool = connect_with_settings(&url, 2, 5).await.expect("connect");
        let foreign_keys = sqlx::query("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("pragma")
            .get::<i64, _>(0);

        assert_eq!(foreign_keys, 1);
        assert!(dir.path().join("tickets.db").exists());
    }
}
