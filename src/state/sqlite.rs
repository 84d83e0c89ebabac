use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::traits::KnowledgeStore;

/// SQLite-backed knowledge store. Records live in a single KV table as
/// JSON; the job queue lives in an ordered list table.
pub struct SqliteKnowledgeStore {
    pool: SqlitePool,
}

impl SqliteKnowledgeStore {
    pub async fn new(db_path: &str) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        Self::connect(SqlitePoolOptions::new().max_connections(5), opts).await
    }

    /// An in-memory database is private to its connection, so the pool
    /// must hold exactly one, and hold it for the store's lifetime.
    #[cfg(test)]
    pub async fn new_in_memory() -> anyhow::Result<Self> {
        let pool_opts = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
        Self::connect(pool_opts, SqliteConnectOptions::new().in_memory(true)).await
    }

    async fn connect(
        pool_opts: SqlitePoolOptions,
        opts: SqliteConnectOptions,
    ) -> anyhow::Result<Self> {
        let pool = pool_opts.connect_with(opts).await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS lists (
                list TEXT NOT NULL,
                pos INTEGER NOT NULL,
                item TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_lists_list ON lists(list, pos)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let raw: String = row.get("value");
                Ok(Some(serde_json::from_str(&raw)?))
            }
        }
    }

    async fn set(&self, key: &str, value: &Value) -> anyhow::Result<()> {
        let raw = serde_json::to_string(value)?;
        sqlx::query(
            "INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(&raw)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_push(&self, list: &str, item: &str) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO lists (list, pos, item)
             VALUES (?, (SELECT COALESCE(MAX(pos), 0) + 1 FROM lists WHERE list = ?), ?)",
        )
        .bind(list)
        .bind(list)
        .bind(item)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_range(&self, list: &str, start: i64, stop: i64) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query("SELECT item FROM lists WHERE list = ? ORDER BY pos ASC")
            .bind(list)
            .fetch_all(&self.pool)
            .await?;
        let items: Vec<String> = rows.iter().map(|r| r.get::<String, _>("item")).collect();
        Ok(slice_range(items, start, stop))
    }

    async fn list_remove(&self, list: &str, item: &str) -> anyhow::Result<()> {
        sqlx::query(
            "DELETE FROM lists WHERE rowid = (
                SELECT rowid FROM lists WHERE list = ? AND item = ? ORDER BY pos ASC LIMIT 1
            )",
        )
        .bind(list)
        .bind(item)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Inclusive range with `-1` meaning "to the end" (list-range semantics).
pub(super) fn slice_range(items: Vec<String>, start: i64, stop: i64) -> Vec<String> {
    let len = items.len() as i64;
    if len == 0 {
        return Vec::new();
    }
    let start = start.clamp(0, len);
    let stop = if stop < 0 { len - 1 } else { stop.min(len - 1) };
    if start > stop {
        return Vec::new();
    }
    items[start as usize..=(stop as usize)].to_vec()
}
