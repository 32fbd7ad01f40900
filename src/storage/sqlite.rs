//! `SQLite`-backed key-value store.

#![allow(clippy::missing_errors_doc)]

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::StorageError;
use crate::traits::{KeyValueStore, RealTimeProvider, TimeProvider};

/// `SQLite` key-value store.
///
/// Documents are stored as JSON text in a single `kv_store` table. Expiry
/// times are written as fixed-width RFC 3339 strings so they compare in
/// time order.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    clock: Arc<dyn TimeProvider>,
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStore")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) a database file.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ConnectionFailed`] if the connection fails, or
    /// [`StorageError::MigrationFailed`] if the schema cannot be created.
    pub async fn new(database_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::with_clock(database_path, Arc::new(RealTimeProvider)).await
    }

    /// Open a database file with an explicit clock for expiry checks.
    pub async fn with_clock(
        database_path: impl AsRef<Path>,
        clock: Arc<dyn TimeProvider>,
    ) -> Result<Self, StorageError> {
        let path = database_path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::ConnectionFailed {
                message: format!("Failed to create database directory: {e}"),
            })?;
        }

        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path.display()))
                .map_err(|e| StorageError::ConnectionFailed {
                    message: format!("Invalid database path: {e}"),
                })?
                .journal_mode(SqliteJournalMode::Wal)
                .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed {
                message: format!("Failed to connect to database: {e}"),
            })?;

        let store = Self { pool, clock };
        store.run_migrations().await?;

        tracing::debug!(path = %path.display(), "Opened SQLite store");
        Ok(store)
    }

    /// Create an in-memory database for testing.
    pub async fn new_in_memory() -> Result<Self, StorageError> {
        Self::new_in_memory_with_clock(Arc::new(RealTimeProvider)).await
    }

    /// Create an in-memory database with an explicit clock.
    pub async fn new_in_memory_with_clock(
        clock: Arc<dyn TimeProvider>,
    ) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::ConnectionFailed {
                message: format!("Invalid memory database options: {e}"),
            })?
            .journal_mode(SqliteJournalMode::Wal);

        // Every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed {
                message: format!("Failed to create in-memory database: {e}"),
            })?;

        let store = Self { pool, clock };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema_001 = include_str!("../../migrations/001_kv_store.sql");
        sqlx::query(schema_001)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::MigrationFailed {
                version: "001".to_string(),
                message: format!("Failed to run migration 001: {e}"),
            })?;

        Ok(())
    }

    /// Delete every expired row. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64, StorageError> {
        let now = format_timestamp(self.clock.now());
        let result =
            sqlx::query("DELETE FROM kv_store WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(|e| Self::query_error("DELETE expired kv_store", format!("{e}")))?;

        let purged = result.rows_affected();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired entries");
        }
        Ok(purged)
    }

    fn query_error(query: &str, message: String) -> StorageError {
        StorageError::QueryFailed {
            query: query.to_string(),
            message,
        }
    }
}

fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(key: &str, s: &str) -> Result<DateTime<Utc>, StorageError> {
    s.parse::<DateTime<Utc>>()
        .map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            message: format!("Failed to parse expiry '{s}': {e}"),
        })
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let row = sqlx::query("SELECT value, expires_at FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Self::query_error("SELECT kv_store", format!("{e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at: Option<String> = row.get("expires_at");
        if let Some(expires_at) = expires_at {
            if parse_timestamp(key, &expires_at)? <= self.clock.now() {
                self.delete(key).await?;
                return Ok(None);
            }
        }

        let text: String = row.get("value");
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| StorageError::Serialization {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let now = self.clock.now();
        // A TTL too large to represent never expires.
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl))
            .map(format_timestamp);
        let text = serde_json::to_string(&value).map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        sqlx::query(
            r"
            INSERT INTO kv_store (key, value, expires_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            ",
        )
        .bind(key)
        .bind(text)
        .bind(expires_at)
        .bind(format_timestamp(now))
        .execute(&self.pool)
        .await
        .map_err(|e| Self::query_error("UPSERT kv_store", format!("{e}")))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| Self::query_error("DELETE kv_store", format!("{e}")))?;

        Ok(result.rows_affected() > 0)
    }
}
