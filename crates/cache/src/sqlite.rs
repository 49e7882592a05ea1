//! SQLite remote tier.
//!
//! A single `cache_entries` table keyed by cache key. Values are stored as
//! JSON text; timestamps as RFC 3339 strings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use tripweave_core::cache::{CacheEntry, CacheSource, RemoteCache};
use tripweave_core::error::CacheError;

/// A durable remote tier backed by a SQLite file.
pub struct SqliteRemote {
    pool: SqlitePool,
}

impl SqliteRemote {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn new(path: &str) -> Result<Self, CacheError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| CacheError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| CacheError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let remote = Self { pool };
        remote.run_migrations().await?;
        info!("SQLite cache backend initialized at {path}");
        Ok(remote)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, CacheError> {
        let remote = Self { pool };
        remote.run_migrations().await?;
        Ok(remote)
    }

    async fn run_migrations(&self) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key         TEXT PRIMARY KEY NOT NULL,
                value       TEXT NOT NULL,
                written_at  TEXT NOT NULL,
                expires_at  TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Storage(format!("cache_entries table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cache_entries_expires_at ON cache_entries(expires_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Storage(format!("expires_at index: {e}")))?;

        debug!("SQLite cache migrations complete");
        Ok(())
    }

    /// Delete rows whose TTL has elapsed. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1")
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| CacheError::Storage(format!("purge failed: {e}")))?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<usize, CacheError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM cache_entries")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CacheError::Storage(format!("count failed: {e}")))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| CacheError::Decode(format!("count column: {e}")))?;
        Ok(n.max(0) as usize)
    }

    fn parse_time(raw: &str) -> Result<DateTime<Utc>, CacheError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| CacheError::Decode(format!("timestamp '{raw}': {e}")))
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<CacheEntry, CacheError> {
        let key: String = row
            .try_get("key")
            .map_err(|e| CacheError::Decode(format!("key column: {e}")))?;
        let value_json: String = row
            .try_get("value")
            .map_err(|e| CacheError::Decode(format!("value column: {e}")))?;
        let written_at: String = row
            .try_get("written_at")
            .map_err(|e| CacheError::Decode(format!("written_at column: {e}")))?;
        let expires_at: Option<String> = row
            .try_get("expires_at")
            .map_err(|e| CacheError::Decode(format!("expires_at column: {e}")))?;

        let value = serde_json::from_str(&value_json)
            .map_err(|e| CacheError::Decode(format!("value for '{key}': {e}")))?;

        Ok(CacheEntry {
            key,
            value,
            written_at: Self::parse_time(&written_at)?,
            expires_at: expires_at.as_deref().map(Self::parse_time).transpose()?,
            source: CacheSource::Remote,
        })
    }
}

#[async_trait]
impl RemoteCache for SqliteRemote {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let row = sqlx::query("SELECT * FROM cache_entries WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CacheError::Storage(format!("SELECT failed: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let entry = Self::row_to_entry(&row)?;
        if entry.is_expired() {
            self.delete(key).await?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let value = serde_json::to_string(&entry.value)
            .map_err(|e| CacheError::Storage(format!("value serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, written_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                written_at = excluded.written_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&entry.key)
        .bind(&value)
        .bind(entry.written_at.to_rfc3339())
        .bind(entry.expires_at.map(|at| at.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Storage(format!("INSERT failed: {e}")))?;

        debug!(key = %entry.key, "Stored cache entry");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| CacheError::Storage(format!("DELETE failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await
            .map_err(|e| CacheError::Storage(format!("clear failed: {e}")))?;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, CacheError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| true)
            .map_err(|e| CacheError::Unavailable(format!("health probe failed: {e}")))
    }
}
