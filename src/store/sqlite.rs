use async_trait::async_trait;
use chrono::Utc;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::KeyValueStore;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed durable store, the `localStorage` of one browser profile.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the profile database
    pub async fn new(config: &StoreConfig) -> StoreResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Connection {
                message: format!("Failed to create store directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StoreError::Connection {
                message: format!("Invalid store URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection {
                message: format!("Failed to open store: {}", e),
            })?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub async fn new_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StoreError::Connection {
                message: format!("Invalid store URL: {}", e),
            }
        })?;

        // Each in-memory connection is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection {
                message: format!("Failed to open in-memory store: {}", e),
            })?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        info!("Running store migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StoreError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Store migrations completed successfully");
        Ok(())
    }

    /// All keys currently stored, sorted.
    pub async fn keys(&self) -> StoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT key FROM local_storage ORDER BY key")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|(key,)| key).collect())
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM local_storage WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        debug!(key = %key, bytes = value.len(), "Writing durable value");

        sqlx::query(
            r#"
            INSERT INTO local_storage (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM local_storage WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_upsert() {
        let store = SqliteStore::new_in_memory().await.unwrap();

        store.set("a", "1").await.unwrap();
        store.set("a", "2").await.unwrap();
        store.set("b", "3").await.unwrap();

        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.keys().await.unwrap(), vec!["a", "b"]);

        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }
}
