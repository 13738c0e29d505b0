//! # SQLite Key-Value Store
//!
//! [`StateStore`] over the `kv_state` table.
//!
//! ```text
//! kv_state
//! ┌────────────────┬──────────────────────────┬──────────────────────────┐
//! │ key (PK)       │ value (JSON text)        │ updated_at (RFC 3339)    │
//! ├────────────────┼──────────────────────────┼──────────────────────────┤
//! │ tags           │ ["vip"]                  │ 2024-05-01T10:00:00Z     │
//! │ pending_sync   │ true                     │ 2024-05-01T10:00:00Z     │
//! └────────────────┴──────────────────────────┴──────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::trace;

use crate::error::DbResult;
use crate::store::StateStore;

/// SQLite-backed [`StateStore`].
#[derive(Debug, Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Creates a store over an already migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        SqliteStateStore { pool }
    }

    /// Number of stored keys.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv_state")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM kv_state WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        trace!(key = %key, "Writing state key");

        sqlx::query(
            r#"
            INSERT INTO kv_state (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM kv_state WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
