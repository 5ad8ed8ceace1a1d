//! Durable key/value store shared by the mutation queue, the upload queue and the draft store.

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::RwLock;

use crate::db_migration;
use crate::errors::{DbError, DbResult};

/// Key/value persistence surviving process restarts.
///
/// Values are opaque bytes; callers that hold structured data go through
/// [`load_json`] / [`save_json`].
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, key: &str) -> DbResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8]) -> DbResult<()>;

    /// Returns whether a value was present.
    async fn del(&self, key: &str) -> DbResult<bool>;

    /// Whether the backend stores raw bytes natively (no text encoding needed).
    fn supports_binary(&self) -> bool {
        true
    }
}

pub async fn load_json<T: DeserializeOwned>(store: &dyn PersistentStore, key: &str) -> DbResult<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub async fn save_json<T: Serialize + ?Sized>(store: &dyn PersistentStore, key: &str, value: &T) -> DbResult<()> {
    let bytes = serde_json::to_vec(value)?;
    store.set(key, &bytes).await
}

// --- SQLite implementation ---

pub struct SqlitePersistentStore {
    pool: SqlitePool,
}

impl SqlitePersistentStore {
    /// Wrap an existing pool. The `kv_store` table must already exist.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `db_url` and apply migrations.
    pub async fn connect(db_url: &str) -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .map_err(|e| DbError::ConnectionPool(format!("Invalid database URL {}: {}", db_url, e)))?
            .create_if_missing(true);

        // Every connection to an in-memory database is a separate database.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| DbError::ConnectionPool(format!("Database connection failed: {}", e)))?;

        db_migration::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl PersistentStore for SqlitePersistentStore {
    async fn get(&self, key: &str) -> DbResult<Option<Vec<u8>>> {
        let value = sqlx::query_scalar::<_, Vec<u8>>("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8]) -> DbResult<()> {
        let now_str = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(&now_str)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// --- In-memory implementation ---

/// Volatile store; used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryPersistentStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    text_only: bool,
}

impl MemoryPersistentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that reports it can only hold text, like browser local storage.
    pub fn text_only() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            text_only: true,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl PersistentStore for MemoryPersistentStore {
    async fn get(&self, key: &str) -> DbResult<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> DbResult<()> {
        self.entries.write().await.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn del(&self, key: &str) -> DbResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    fn supports_binary(&self) -> bool {
        !self.text_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        title: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip_and_delete() {
        let store = MemoryPersistentStore::new();
        assert!(store.get("missing").await.unwrap().is_none());

        store.set("k", b"value").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"value".to_vec()));

        assert!(store.del("k").await.unwrap());
        assert!(!store.del("k").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_sqlite_store_upserts() {
        let store = SqlitePersistentStore::connect("sqlite::memory:").await.unwrap();

        save_json(&store, "form-autosave-x", &Sample { title: "a".into(), count: 1 }).await.unwrap();
        save_json(&store, "form-autosave-x", &Sample { title: "b".into(), count: 2 }).await.unwrap();

        let loaded: Option<Sample> = load_json(&store, "form-autosave-x").await.unwrap();
        assert_eq!(loaded, Some(Sample { title: "b".into(), count: 2 }));

        assert!(store.del("form-autosave-x").await.unwrap());
        let gone: Option<Sample> = load_json(&store, "form-autosave-x").await.unwrap();
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_url = format!("sqlite://{}", dir.path().join("offline.sqlite").display());

        {
            let store = SqlitePersistentStore::connect(&db_url).await.unwrap();
            store.set("mutation-queue", b"[]").await.unwrap();
            store.pool().close().await;
        }

        let reopened = SqlitePersistentStore::connect(&db_url).await.unwrap();
        assert_eq!(reopened.get("mutation-queue").await.unwrap(), Some(b"[]".to_vec()));
    }

    #[tokio::test]
    async fn test_load_json_reports_corrupt_values() {
        let store = MemoryPersistentStore::new();
        store.set("bad", b"{not json").await.unwrap();
        let result: DbResult<Option<Sample>> = load_json(&store, "bad").await;
        assert!(matches!(result, Err(DbError::Serialization(_))));
    }
}
