use std::collections::HashMap;
use std::str::FromStr;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use tokio::sync::Mutex;

use crate::modules::error::{Result, TrackerError};

pub const KEY_ACTIVITIES: &str = "activities";
pub const KEY_SCREENSHOTS: &str = "screenshots";
pub const KEY_PATTERNS: &str = "patterns";
pub const KEY_LAST_ANALYSIS: &str = "lastAnalysis";

/// Persisted key-value state. Values are whole JSON documents: callers read
/// the full blob, mutate it in memory and write it back.
pub trait KvStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;
    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>>;
    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;
    /// Bytes used by all persisted keys and values.
    fn bytes_in_use(&self) -> BoxFuture<'_, Result<u64>>;
}

pub async fn load_json<T: DeserializeOwned>(kv: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match kv.get(key).await? {
        Some(raw) => {
            let value = serde_json::from_str(&raw)?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

pub async fn save_json<T: Serialize + ?Sized>(kv: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    kv.set(key, raw).await
}

pub struct SqliteKvStore {
    pub pool: Pool<Sqlite>,
}

impl SqliteKvStore {
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_path)
            .map_err(|e| TrackerError::Storage(format!("Invalid database path {}: {}", db_path, e)))?
            .create_if_missing(true);
        Self::connect(options).await
    }

    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| TrackerError::Storage(format!("Failed to open in-memory database: {}", e)))?;
        Self::connect(options).await
    }

    // One connection: writes are serialized and an in-memory database lives
    // as long as the pool does.
    async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| TrackerError::Storage(format!("Failed to connect to database: {}", e)))?;

        let db = Self { pool };
        db.initialize_schema().await?;
        Ok(db)
    }

    async fn initialize_schema(&self) -> Result<()> {
        let schema = r#"
        CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );
        "#;

        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| TrackerError::Storage(format!("Failed to create schema: {}", e)))?;

        Ok(())
    }
}

impl KvStore for SqliteKvStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| TrackerError::Storage(format!("Failed to read {}: {}", key, e)))?;

            match row {
                Some(r) => {
                    let value: String = r
                        .try_get("value")
                        .map_err(|e| TrackerError::Storage(format!("Failed to get value: {}", e)))?;
                    Ok(Some(value))
                }
                None => Ok(None),
            }
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            sqlx::query(
                r#"
                INSERT INTO kv_store (key, value)
                VALUES (?1, ?2)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(|e| TrackerError::Storage(format!("Failed to write {}: {}", key, e)))?;

            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM kv_store WHERE key = ?1")
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(|e| TrackerError::Storage(format!("Failed to delete {}: {}", key, e)))?;
            Ok(())
        })
    }

    fn bytes_in_use(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0) AS bytes FROM kv_store",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(|e| TrackerError::Storage(format!("Failed to measure storage: {}", e)))?;

            let bytes: i64 = row
                .try_get("bytes")
                .map_err(|e| TrackerError::Storage(format!("Failed to get bytes: {}", e)))?;
            Ok(bytes.max(0) as u64)
        })
    }
}

/// Map-backed store with the same byte accounting as the SQLite one.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move { Ok(self.entries.lock().await.get(key).cloned()) })
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.entries.lock().await.insert(key.to_string(), value);
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.entries.lock().await.remove(key);
            Ok(())
        })
    }

    fn bytes_in_use(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let entries = self.entries.lock().await;
            Ok(entries.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sqlite_set_get_overwrite_remove() {
        let kv = SqliteKvStore::in_memory().await.unwrap();

        assert_eq!(kv.get(KEY_PATTERNS).await.unwrap(), None);
        kv.set(KEY_PATTERNS, "[]".to_string()).await.unwrap();
        kv.set(KEY_PATTERNS, "[1,2]".to_string()).await.unwrap();
        assert_eq!(kv.get(KEY_PATTERNS).await.unwrap().as_deref(), Some("[1,2]"));

        kv.remove(KEY_PATTERNS).await.unwrap();
        assert_eq!(kv.get(KEY_PATTERNS).await.unwrap(), None);
    }

    #[tokio::test]
    async fn bytes_in_use_counts_keys_and_values() {
        let sqlite = SqliteKvStore::in_memory().await.unwrap();
        let memory = MemoryKvStore::new();

        for kv in [&sqlite as &dyn KvStore, &memory as &dyn KvStore] {
            assert_eq!(kv.bytes_in_use().await.unwrap(), 0);
            kv.set("abc", "12345".to_string()).await.unwrap();
            kv.set(KEY_LAST_ANALYSIS, "7".to_string()).await.unwrap();
            assert_eq!(kv.bytes_in_use().await.unwrap(), 3 + 5 + 12 + 1);
        }
    }

    #[tokio::test]
    async fn sqlite_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.db");
        let path = path.to_str().unwrap();

        {
            let kv = SqliteKvStore::new(path).await.unwrap();
            save_json(&kv, KEY_ACTIVITIES, &vec![1, 2, 3]).await.unwrap();
            kv.pool.close().await;
        }

        let kv = SqliteKvStore::new(path).await.unwrap();
        let restored: Option<Vec<i32>> = load_json(&kv, KEY_ACTIVITIES).await.unwrap();
        assert_eq!(restored, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn load_json_reports_corrupt_blob() {
        let kv = MemoryKvStore::new();
        kv.set(KEY_PATTERNS, "{not json".to_string()).await.unwrap();
        let result: Result<Option<Vec<i32>>> = load_json(&kv, KEY_PATTERNS).await;
        assert!(matches!(result, Err(TrackerError::Serialization(_))));
    }
}
