use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, Row, SqlitePool};
use std::{path::Path, str::FromStr};
use tracing::warn;

/// Well-known keys. Each holds one JSON document, always read and written whole.
pub mod keys {
    pub const CHAT_HISTORY: &str = "chatHistory";
    pub const SUGGESTIONS: &str = "suggestions";
    pub const TEMPLATE_FAVORITES: &str = "templateFavorites";
    pub const KNOWLEDGE_ITEMS: &str = "knowledgeItems";
    pub const FINANCE_BILLS: &str = "financeBills";
    pub const USER_PROFILE: &str = "userProfile";
}

/// Durable key-value storage backed by a single SQLite table.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new Store instance.
    /// This will automatically create the database file if it doesn't exist.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self { pool })
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        Ok(())
    }

    pub async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to read key {}", key))?;

        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    /// Overwrite the whole value under `key`. Last writer wins.
    pub async fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to write key {}", key))?;

        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to remove key {}", key))?;
        Ok(())
    }

    /// Read a JSON document. A value that no longer parses as `T` is dropped
    /// and reported as absent.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get_raw(key).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Discarding unreadable value under {}: {}", key, e);
                self.remove(key).await?;
                Ok(None)
            }
        }
    }

    pub async fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)
            .with_context(|| format!("Failed to serialize value for {}", key))?;
        self.put_raw(key, &raw).await
    }

    /// Read a whole list, treating a missing or unreadable value as empty.
    pub async fn get_list<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        Ok(self.get_json(key).await?.unwrap_or_default())
    }

    /// Read-modify-write a whole list. Callers serialize these cycles per key.
    pub async fn update_list<T, R>(
        &self,
        key: &str,
        mutate: impl FnOnce(&mut Vec<T>) -> R,
    ) -> Result<R>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut items: Vec<T> = self.get_list(key).await?;
        let result = mutate(&mut items);
        self.put_json(key, &items).await?;
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) async fn temp_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::new(dir.path().join("agora.db"))
        .await
        .expect("open store");
    store.init().await.expect("init store");
    (dir, store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn raw_values_round_trip_and_overwrite() {
        let (_dir, store) = temp_store().await;
        assert_eq!(store.get_raw("k").await.unwrap(), None);

        store.put_raw("k", "one").await.unwrap();
        store.put_raw("k", "two").await.unwrap();
        assert_eq!(store.get_raw("k").await.unwrap().as_deref(), Some("two"));

        store.remove("k").await.unwrap();
        assert_eq!(store.get_raw("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unreadable_json_is_discarded() {
        let (_dir, store) = temp_store().await;
        store.put_raw(keys::SUGGESTIONS, "{not json").await.unwrap();

        let list: Vec<String> = store.get_list(keys::SUGGESTIONS).await.unwrap();
        assert!(list.is_empty());
        assert_eq!(store.get_raw(keys::SUGGESTIONS).await.unwrap(), None);
    }

    #[tokio::test]
    async fn update_list_persists_the_whole_list() {
        let (_dir, store) = temp_store().await;
        let len = store
            .update_list(keys::TEMPLATE_FAVORITES, |ids: &mut Vec<String>| {
                ids.push("1".into());
                ids.push("3".into());
                ids.len()
            })
            .await
            .unwrap();
        assert_eq!(len, 2);

        let ids: Vec<String> = store.get_list(keys::TEMPLATE_FAVORITES).await.unwrap();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[tokio::test]
    async fn store_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("agora.db");
        let store = Store::new(&path).await.unwrap();
        store.init().await.unwrap();
        assert!(path.exists());
    }
}
