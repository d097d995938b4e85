//! Settings Storage using SQLite

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{SettingsStore, SettingsTransaction},
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
"#;

const UPSERT: &str = r#"
    INSERT INTO settings (key, value, updated_at)
    VALUES (?, ?, ?)
    ON CONFLICT(key) DO UPDATE SET
        value = excluded.value,
        updated_at = excluded.updated_at
"#;

fn storage_error(context: &str, e: sqlx::Error) -> BridgeError {
    BridgeError::Storage(format!("{}: {}", context, e))
}

/// SQLite-backed settings store implementation
///
/// Client-local durable key-value storage. Writes made through
/// [`SettingsStore::begin_transaction`] become visible together on commit.
pub struct SqliteSettingsStore {
    pool: SqlitePool,
}

impl SqliteSettingsStore {
    /// Open (creating if needed) a settings database at `db_path`.
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BridgeError::Io)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| storage_error("Failed to open settings database", e))?;

        Self::init_schema(&pool).await?;
        debug!(path = ?db_path, "Initialized settings store");

        Ok(Self { pool })
    }

    /// Open the store at the platform data directory
    /// (e.g. `~/.local/share/<app_name>/settings.db`).
    pub async fn open_default(app_name: &str) -> Result<Self> {
        Self::open(Self::default_path(app_name)?).await
    }

    /// Default database location for `app_name`.
    pub fn default_path(app_name: &str) -> Result<PathBuf> {
        let base = dirs::data_dir()
            .ok_or_else(|| BridgeError::NotAvailable("platform data directory".to_string()))?;
        Ok(base.join(app_name).join("settings.db"))
    }

    /// Create an in-memory settings store (for testing)
    ///
    /// A single connection is used so every query sees the same database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| storage_error("Failed to open in-memory database", e))?;

        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(CREATE_TABLE)
            .execute(pool)
            .await
            .map_err(|e| storage_error("Failed to create settings table", e))?;
        Ok(())
    }

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(UPSERT)
            .bind(key)
            .bind(value)
            .bind(Self::now())
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to set setting", e))?;

        debug!(key = key, "Stored setting");
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to get setting", e))?;

        Ok(row.map(|row| row.get(0)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to delete setting", e))?;

        debug!(key = key, "Deleted setting");
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to check key", e))?;

        Ok(row.is_some())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM settings ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to list keys", e))?;

        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    async fn clear_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM settings")
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to clear settings", e))?;

        debug!("Cleared all settings");
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn SettingsTransaction + Send>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("Failed to begin transaction", e))?;

        Ok(Box::new(SqliteSettingsTransaction { tx: Some(tx) }))
    }
}

/// SQLite settings transaction. Dropping it without commit rolls back.
struct SqliteSettingsTransaction {
    tx: Option<sqlx::Transaction<'static, sqlx::Sqlite>>,
}

impl SqliteSettingsTransaction {
    fn active(&mut self) -> Result<&mut sqlx::Transaction<'static, sqlx::Sqlite>> {
        self.tx.as_mut().ok_or_else(|| {
            BridgeError::Storage("Transaction already finished".to_string())
        })
    }
}

#[async_trait]
impl SettingsTransaction for SqliteSettingsTransaction {
    async fn set_string(&mut self, key: &str, value: &str) -> Result<()> {
        let tx = self.active()?;

        sqlx::query(UPSERT)
            .bind(key)
            .bind(value)
            .bind(SqliteSettingsStore::now())
            .execute(&mut **tx)
            .await
            .map_err(|e| storage_error("Failed to stage setting", e))?;

        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<()> {
        let tx = self.active()?;

        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&mut **tx)
            .await
            .map_err(|e| storage_error("Failed to stage deletion", e))?;

        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let tx = self.tx.take().ok_or_else(|| {
            BridgeError::Storage("Transaction already finished".to_string())
        })?;

        tx.commit()
            .await
            .map_err(|e| storage_error("Failed to commit", e))?;

        debug!("Committed settings transaction");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        let tx = self.tx.take().ok_or_else(|| {
            BridgeError::Storage("Transaction already finished".to_string())
        })?;

        tx.rollback()
            .await
            .map_err(|e| storage_error("Failed to rollback", e))?;

        debug!("Rolled back settings transaction");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_string_operations() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();

        store.set_string("token", "abc").await.unwrap();
        assert_eq!(
            store.get_string("token").await.unwrap(),
            Some("abc".to_string())
        );
        assert!(store.has_key("token").await.unwrap());

        store.set_string("token", "def").await.unwrap();
        assert_eq!(
            store.get_string("token").await.unwrap(),
            Some("def".to_string())
        );

        store.delete("token").await.unwrap();
        assert_eq!(store.get_string("token").await.unwrap(), None);
        assert!(!store.has_key("token").await.unwrap());

        // Deleting a missing key is not an error
        store.delete("token").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_and_clear() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();

        store.set_string("refreshToken", "r").await.unwrap();
        store.set_string("token", "a").await.unwrap();

        let keys = store.list_keys().await.unwrap();
        assert_eq!(keys, vec!["refreshToken", "token"]);

        store.clear_all().await.unwrap();
        assert!(store.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transaction_commit_writes_pair() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();
        store.set_string("token", "old").await.unwrap();

        let mut tx = store.begin_transaction().await.unwrap();
        tx.set_string("token", "A2").await.unwrap();
        tx.set_string("refreshToken", "R2").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.get_string("token").await.unwrap(), Some("A2".into()));
        assert_eq!(
            store.get_string("refreshToken").await.unwrap(),
            Some("R2".into())
        );
    }

    #[tokio::test]
    async fn test_transaction_rollback_discards_changes() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();
        store.set_string("token", "A1").await.unwrap();

        let mut tx = store.begin_transaction().await.unwrap();
        tx.set_string("token", "A2").await.unwrap();
        tx.delete("token").await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.get_string("token").await.unwrap(), Some("A1".into()));
    }

    #[tokio::test]
    async fn test_transaction_dropped_without_commit_rolls_back() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();

        {
            let mut tx = store.begin_transaction().await.unwrap();
            tx.set_string("token", "A2").await.unwrap();
        }

        assert_eq!(store.get_string("token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_open_creates_database_file() {
        let dir = std::env::temp_dir().join(format!(
            "health-settings-test-{}-{}",
            std::process::id(),
            SqliteSettingsStore::now()
        ));
        let path = dir.join("nested").join("settings.db");

        {
            let store = SqliteSettingsStore::open(&path).await.unwrap();
            store.set_string("token", "persisted").await.unwrap();
        }

        let reopened = SqliteSettingsStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.get_string("token").await.unwrap(),
            Some("persisted".into())
        );

        let _ = std::fs::remove_dir_all(dir);
    }
}
