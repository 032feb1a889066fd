//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and single-process use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use uuid::Uuid;

use super::{Lease, LeaseAttempt, LeaseStore, StorageError};
use crate::core::job::JobRecord;
use crate::core::types::JobId;

struct Entry {
    record: JobRecord,
    lease: Option<(Uuid, DateTime<Utc>)>,
    seq: u64,
}

impl Entry {
    fn lease_held(&self, now: DateTime<Utc>) -> bool {
        self.lease.is_some_and(|(_, expires_at)| expires_at > now)
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<JobId, Entry>,
    next_seq: u64,
}

/// In-memory storage backend.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseStore for InMemoryStore {
    async fn get(&self, id: &JobId) -> Result<Option<JobRecord>, StorageError> {
        let inner = self.inner.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(inner.entries.get(id).map(|entry| entry.record.clone()))
    }

    async fn create(&self, record: &JobRecord) -> Result<bool, StorageError> {
        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        if inner.entries.contains_key(record.id()) {
            return Ok(false);
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            record.id().clone(),
            Entry {
                record: record.clone(),
                lease: None,
                seq,
            },
        );
        Ok(true)
    }

    async fn try_acquire_lease(
        &self,
        id: &JobId,
        duration: Duration,
    ) -> Result<LeaseAttempt, StorageError> {
        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        let entry = inner
            .entries
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))?;

        if entry.lease_held(Utc::now()) {
            return Ok(LeaseAttempt::Busy);
        }

        let lease = Lease::new(id.clone(), duration);
        entry.lease = Some((lease.token(), lease.expires_at()));
        Ok(LeaseAttempt::Acquired {
            lease,
            record: entry.record.clone(),
        })
    }

    async fn update(&self, lease: &Lease, record: &JobRecord) -> Result<(), StorageError> {
        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        let entry = inner
            .entries
            .get_mut(lease.key())
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", lease.key())))?;

        match entry.lease {
            Some((token, expires_at)) if token == lease.token() && expires_at > Utc::now() => {
                entry.record = record.clone();
                Ok(())
            }
            _ => Err(StorageError::LeaseLost(lease.key().to_string())),
        }
    }

    async fn release(&self, lease: Lease) -> Result<(), StorageError> {
        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        if let Some(entry) = inner.entries.get_mut(lease.key()) {
            if entry.lease.is_some_and(|(token, _)| token == lease.token()) {
                entry.lease = None;
            }
        }
        Ok(())
    }

    async fn delete(&self, id: &JobId) -> Result<bool, StorageError> {
        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(inner.entries.remove(id).is_some())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<JobId>, StorageError> {
        let inner = self.inner.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut keys: Vec<_> = inner
            .entries
            .iter()
            .filter(|(id, _)| id.as_str().starts_with(prefix))
            .map(|(id, entry)| (entry.seq, id.clone()))
            .collect();
        keys.sort_by_key(|(seq, _)| *seq);
        Ok(keys.into_iter().map(|(_, id)| id).collect())
    }
}
