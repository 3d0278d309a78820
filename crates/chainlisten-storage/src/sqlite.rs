//! SQLite idempotency store.
//!
//! Persists seen log keys and the checkpoint to a single SQLite file so a
//! restarted listener skips logs it already handled and resumes its scan.
//!
//! # Usage
//! ```rust,no_run
//! use chainlisten_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./listener.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainlisten_core::error::StoreError;
use chainlisten_core::store::IdempotencyStore;
use chainlisten_core::types::IdempotencyKey;

fn storage_err(e: sqlx::Error) -> StoreError {
    StoreError(e.to_string())
}

fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError(format!("{value} does not fit in INTEGER")))
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database at `path`.
    ///
    /// The path may be a plain file path (`"./listener.db"`) or a full
    /// SQLite URL (`"sqlite:./listener.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        debug!(url = %url, "sqlite store opened");
        Ok(store)
    }

    /// In-memory database on a single pinned connection. Every
    /// `:memory:` connection is its own database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS seen_logs (
                tx_hash   TEXT    NOT NULL,
                log_index INTEGER NOT NULL,
                seen_at   INTEGER NOT NULL,
                PRIMARY KEY (tx_hash, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        // single row, id pinned to 0
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoint (
                id           INTEGER PRIMARY KEY CHECK (id = 0),
                block_number INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Number of keys recorded.
    pub async fn seen_count(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM seen_logs")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let n: i64 = row.try_get("n").map_err(storage_err)?;
        Ok(n.max(0) as u64)
    }

    async fn insert_key(&self, key: &IdempotencyKey) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO seen_logs (tx_hash, log_index, seen_at) VALUES (?, ?, ?)",
        )
        .bind(key.transaction_hash.to_string())
        .bind(to_i64(key.log_index)?)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl IdempotencyStore for SqliteStore {
    async fn seen(&self, key: &IdempotencyKey) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM seen_logs WHERE tx_hash = ? AND log_index = ?")
            .bind(key.transaction_hash.to_string())
            .bind(to_i64(key.log_index)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.is_some())
    }

    async fn mark_seen(&self, key: &IdempotencyKey) -> Result<(), StoreError> {
        self.insert_key(key).await.map(|_| ())
    }

    async fn claim(&self, key: &IdempotencyKey) -> Result<bool, StoreError> {
        self.insert_key(key).await
    }

    async fn checkpoint(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT block_number FROM checkpoint WHERE id = 0")
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        match row {
            Some(r) => {
                let n: i64 = r.try_get("block_number").map_err(storage_err)?;
                Ok(n.max(0) as u64)
            }
            None => Ok(0),
        }
    }

    async fn advance_checkpoint(&self, block: u64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO checkpoint (id, block_number, updated_at) VALUES (0, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                block_number = excluded.block_number,
                updated_at   = excluded.updated_at
             WHERE excluded.block_number > checkpoint.block_number",
        )
        .bind(to_i64(block)?)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    fn key(n: u8, idx: u64) -> IdempotencyKey {
        IdempotencyKey::new(B256::repeat_byte(n), idx)
    }

    #[tokio::test]
    async fn claim_and_seen() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(!store.seen(&key(1, 0)).await.unwrap());
        assert!(store.claim(&key(1, 0)).await.unwrap());
        assert!(!store.claim(&key(1, 0)).await.unwrap());
        assert!(store.seen(&key(1, 0)).await.unwrap());
        store.mark_seen(&key(1, 0)).await.unwrap();
        assert_eq!(store.seen_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn checkpoint_monotonic() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(store.checkpoint().await.unwrap(), 0);
        store.advance_checkpoint(500).await.unwrap();
        store.advance_checkpoint(200).await.unwrap();
        assert_eq!(store.checkpoint().await.unwrap(), 500);
        store.advance_checkpoint(501).await.unwrap();
        assert_eq!(store.checkpoint().await.unwrap(), 501);
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let path = std::env::temp_dir().join(format!(
            "chainlisten-store-{}-{}.db",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let path = path.to_string_lossy().to_string();

        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.claim(&key(4, 2)).await.unwrap();
            store.advance_checkpoint(42).await.unwrap();
            store.pool.close().await;
        }

        let reopened = SqliteStore::open(&path).await.unwrap();
        assert!(reopened.seen(&key(4, 2)).await.unwrap());
        assert_eq!(reopened.checkpoint().await.unwrap(), 42);
        reopened.pool.close().await;

        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{path}{suffix}"));
        }
    }
}
