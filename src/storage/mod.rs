//! Lease-guarded storage for job records.
//!
//! Every job record lives under its job identifier. Mutations go through a
//! short, expiring lease: acquiring it never blocks, and a holder that
//! crashes simply lets the lease run out.
//!
//! This module provides the [`LeaseStore`] trait and pluggable backends
//! (in-memory and SQLite).

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::core::job::JobRecord;
use crate::core::types::JobId;

/// Delay between attempts in [`acquire_with_wait`].
pub const LEASE_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The lease expired or was taken over before the write.
    #[error("lease lost on {0}")]
    LeaseLost(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::SerializationError(e.to_string())
    }
}

/// Proof of holding the lease on one record.
///
/// Not `Clone`: releasing consumes it.
#[derive(Debug)]
pub struct Lease {
    key: JobId,
    token: Uuid,
    expires_at: DateTime<Utc>,
}

impl Lease {
    pub(crate) fn new(key: JobId, duration: Duration) -> Self {
        let ttl = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            key,
            token: Uuid::new_v4(),
            expires_at,
        }
    }

    /// Rebuild a lease from its stored parts.
    ///
    /// For [`LeaseStore`] implementations outside this crate, which hand out
    /// leases from their own token and expiry columns.
    pub fn from_parts(key: JobId, token: Uuid, expires_at: DateTime<Utc>) -> Self {
        Self {
            key,
            token,
            expires_at,
        }
    }

    /// Key this lease guards.
    pub fn key(&self) -> &JobId {
        &self.key
    }

    pub fn token(&self) -> Uuid {
        self.token
    }

    /// When the store stops honouring this lease.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// True if the lease has run out.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Result of a lease attempt.
#[derive(Debug)]
pub enum LeaseAttempt {
    /// Lease granted, with the record as read under it.
    Acquired { lease: Lease, record: JobRecord },
    /// Another holder's lease has not expired yet.
    Busy,
}

/// Storage backend for job records.
///
/// Implementations must be thread-safe (`Send + Sync`).
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Read a record without taking a lease.
    async fn get(&self, id: &JobId) -> Result<Option<JobRecord>, StorageError>;

    /// Insert a record unless one already exists under its id.
    ///
    /// Returns true if the record was inserted.
    async fn create(&self, record: &JobRecord) -> Result<bool, StorageError>;

    /// Try to take the lease on a record without waiting.
    ///
    /// Fails with [`StorageError::NotFound`] if there is no such record.
    async fn try_acquire_lease(
        &self,
        id: &JobId,
        duration: Duration,
    ) -> Result<LeaseAttempt, StorageError>;

    /// Overwrite the leased record.
    ///
    /// Fails with [`StorageError::LeaseLost`] if the lease expired or was
    /// superseded, and with [`StorageError::NotFound`] if the record was deleted.
    async fn update(&self, lease: &Lease, record: &JobRecord) -> Result<(), StorageError>;

    /// Give the lease back. A lease that was already superseded is ignored.
    async fn release(&self, lease: Lease) -> Result<(), StorageError>;

    /// Remove a record regardless of any lease. Returns true if it existed.
    async fn delete(&self, id: &JobId) -> Result<bool, StorageError>;

    /// List job identifiers starting with `prefix`, in store order.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<JobId>, StorageError>;
}

/// Retry [`LeaseStore::try_acquire_lease`] until it succeeds or `wait` elapses.
///
/// Meant for management writes that should tolerate a pass briefly holding
/// the lease. The scheduling pass itself never waits.
pub async fn acquire_with_wait(
    store: &dyn LeaseStore,
    id: &JobId,
    duration: Duration,
    wait: Duration,
) -> Result<LeaseAttempt, StorageError> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match store.try_acquire_lease(id, duration).await? {
            LeaseAttempt::Busy if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(LEASE_RETRY_INTERVAL).await;
            }
            attempt => return Ok(attempt),
        }
    }
}
