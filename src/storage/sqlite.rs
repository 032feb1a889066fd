//! SQLite storage implementation.
//!
//! Provides persistent storage using SQLite database. Records are stored as
//! JSON documents next to their lease columns, and every lease transition is a
//! single conditional `UPDATE`, so several scheduler processes can share one
//! database file.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::{Lease, LeaseAttempt, LeaseStore, StorageError};
use crate::core::job::JobRecord;
use crate::core::types::JobId;

/// SQLite storage backend.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given database path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StorageError::Other(e.to_string()))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn exists(&self, id: &JobId) -> Result<bool, StorageError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM cron_jobs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(row.is_some())
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn decode(raw: &str) -> Result<JobRecord, StorageError> {
    Ok(serde_json::from_str(raw)?)
}

#[async_trait]
impl LeaseStore for SqliteStore {
    async fn get(&self, id: &JobId) -> Result<Option<JobRecord>, StorageError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT record FROM cron_jobs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        row.map(|(raw,)| decode(&raw)).transpose()
    }

    async fn create(&self, record: &JobRecord) -> Result<bool, StorageError> {
        let raw = serde_json::to_string(record)?;
        let now = now_millis();
        let result = sqlx::query(
            r#"
            INSERT INTO cron_jobs (id, record, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(record.id().as_str())
        .bind(raw)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn try_acquire_lease(
        &self,
        id: &JobId,
        duration: Duration,
    ) -> Result<LeaseAttempt, StorageError> {
        let lease = Lease::new(id.clone(), duration);
        let result = sqlx::query(
            r#"
            UPDATE cron_jobs SET lease_token = ?, lease_expires_at = ?
            WHERE id = ? AND (lease_token IS NULL OR lease_expires_at <= ?)
            "#,
        )
        .bind(lease.token().to_string())
        .bind(lease.expires_at().timestamp_millis())
        .bind(id.as_str())
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            if self.exists(id).await? {
                return Ok(LeaseAttempt::Busy);
            }
            return Err(StorageError::NotFound(format!("job: {}", id)));
        }

        let read = match self.get(id).await {
            Ok(Some(record)) => return Ok(LeaseAttempt::Acquired { lease, record }),
            Ok(None) => StorageError::NotFound(format!("job: {}", id)),
            Err(e) => e,
        };

        // The caller never sees this lease, so hand it back now.
        if let Err(e) = self.release(lease).await {
            tracing::warn!(job_id = %id, error = %e, "Failed to release lease; it will expire");
        }
        Err(read)
    }

    async fn update(&self, lease: &Lease, record: &JobRecord) -> Result<(), StorageError> {
        let raw = serde_json::to_string(record)?;
        let now = now_millis();
        let result = sqlx::query(
            r#"
            UPDATE cron_jobs SET record = ?, updated_at = ?
            WHERE id = ? AND lease_token = ? AND lease_expires_at > ?
            "#,
        )
        .bind(raw)
        .bind(now)
        .bind(lease.key().as_str())
        .bind(lease.token().to_string())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            if self.exists(lease.key()).await? {
                return Err(StorageError::LeaseLost(lease.key().to_string()));
            }
            return Err(StorageError::NotFound(format!("job: {}", lease.key())));
        }
        Ok(())
    }

    async fn release(&self, lease: Lease) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE cron_jobs SET lease_token = NULL, lease_expires_at = NULL
            WHERE id = ? AND lease_token = ?
            "#,
        )
        .bind(lease.key().as_str())
        .bind(lease.token().to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, id: &JobId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM cron_jobs WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<JobId>, StorageError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT id FROM cron_jobs
            WHERE substr(id, 1, ?) = ?
            ORDER BY created_at, rowid
            "#,
        )
        .bind(prefix.chars().count() as i64)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        Ok(rows.into_iter().map(|(id,)| JobId::new(id)).collect())
    }
}
