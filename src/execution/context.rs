//! Per-run context handed to flows, and lease-guarded continuation state.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::FlowError;
use crate::core::types::{JobId, RunHandle};
use crate::storage::{LeaseAttempt, LeaseStore, StorageError, acquire_with_wait};

/// Reads and writes the continuation state stored in a job record.
///
/// Writes take the job's lease, waiting up to `wait` for a scheduling pass
/// to let go of it.
#[derive(Clone)]
pub struct ContinuationStore {
    store: Arc<dyn LeaseStore>,
    lease_duration: Duration,
    wait: Duration,
}

/// Outcome of a continuation write that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateWrite {
    Written,
    Busy,
}

impl ContinuationStore {
    pub fn new(store: Arc<dyn LeaseStore>, lease_duration: Duration, wait: Duration) -> Self {
        Self {
            store,
            lease_duration,
            wait,
        }
    }

    /// Current continuation state of a job. Fails with NotFound for unknown jobs.
    pub async fn read(&self, job_id: &JobId) -> Result<Option<Value>, StorageError> {
        let record = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", job_id)))?;
        Ok(record.state.continuation)
    }

    /// Replace the continuation state of a job.
    pub async fn write(&self, job_id: &JobId, value: Value) -> Result<StateWrite, StorageError> {
        let attempt =
            acquire_with_wait(self.store.as_ref(), job_id, self.lease_duration, self.wait).await?;

        let (lease, mut record) = match attempt {
            LeaseAttempt::Acquired { lease, record } => (lease, record),
            LeaseAttempt::Busy => return Ok(StateWrite::Busy),
        };

        record.state.continuation = Some(value);
        let result = self.store.update(&lease, &record).await;
        if let Err(e) = self.store.release(lease).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to release lease; it will expire");
        }
        result.map(|_| StateWrite::Written)
    }
}

/// What a running flow knows about itself.
#[derive(Clone)]
pub struct FlowContext {
    pub job_id: JobId,
    pub handle: RunHandle,
    state: Option<ContinuationStore>,
}

impl FlowContext {
    pub fn new(job_id: JobId, handle: RunHandle, state: Option<ContinuationStore>) -> Self {
        Self {
            job_id,
            handle,
            state,
        }
    }

    /// Continuation state left by a previous run.
    pub async fn read_state(&self) -> Result<Option<Value>, FlowError> {
        let store = self.continuation()?;
        store
            .read(&self.job_id)
            .await
            .map_err(|e| FlowError::State(e.to_string()))
    }

    /// Persist continuation state for the next run.
    pub async fn write_state(&self, value: Value) -> Result<(), FlowError> {
        let store = self.continuation()?;
        match store.write(&self.job_id, value).await {
            Ok(StateWrite::Written) => Ok(()),
            Ok(StateWrite::Busy) => Err(FlowError::State(format!(
                "job {} stayed leased, state not written",
                self.job_id
            ))),
            Err(e) => Err(FlowError::State(e.to_string())),
        }
    }

    fn continuation(&self) -> Result<&ContinuationStore, FlowError> {
        self.state
            .as_ref()
            .ok_or_else(|| FlowError::State("no continuation store attached".to_string()))
    }
}
