//! Scheduler type definitions.
//!
//! This module contains error types, pass results, worker state enums, and
//! command types for the scheduling loop.

use std::collections::BTreeMap;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::core::job::{JobSpecError, RunStatus};
use crate::core::types::{JobId, RunHandle};
use crate::execution::ExecutorError;
use crate::storage::StorageError;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Another process holds the job's lease.
    #[error("job busy: {0}")]
    JobBusy(String),

    /// The job spec cannot be scheduled.
    #[error("invalid job spec: {0}")]
    InvalidSpec(String),

    /// A job with this identifier already exists.
    #[error("job already exists: {0}")]
    AlreadyExists(String),

    /// The lease expired before the record could be written.
    #[error("lease lost: {0}")]
    LeaseLost(String),

    /// Flow executor error.
    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// Metrics registration failed.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

impl From<StorageError> for SchedulerError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(what) => SchedulerError::JobNotFound(what),
            StorageError::LeaseLost(what) => SchedulerError::LeaseLost(what),
            other => SchedulerError::Storage(other),
        }
    }
}

impl From<JobSpecError> for SchedulerError {
    fn from(e: JobSpecError) -> Self {
        SchedulerError::InvalidSpec(e.to_string())
    }
}

/// What one run pass did to a job while holding its lease.
#[derive(Debug, Clone, PartialEq)]
pub enum PassStep {
    /// A new run was started.
    Started {
        handle: RunHandle,
        /// Status recorded for the previous run in the same pass, if it finished.
        reconciled: Option<RunStatus>,
    },
    /// The tracked run overran its lifetime and was terminated.
    TimedOut,
    /// Nothing was started.
    Idle { reconciled: Option<RunStatus> },
}

/// How a forced run that was waited on ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// Run-now did not start a run; the step says what it did instead.
    NotStarted(PassStep),
    /// The run ended on its own and was recorded with `status`.
    Finished { handle: RunHandle, status: RunStatus },
    /// The run was still going when the wait ran out. It was terminated and
    /// recorded with `status`.
    Stopped { handle: RunHandle, status: RunStatus },
}

/// Per-job result of a scheduling pass.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPassOutcome {
    /// The lease was held and the job was processed.
    Processed(PassStep),
    /// Another holder had the lease; skipped.
    Busy,
    /// The job disappeared between listing and leasing.
    Missing,
    /// Processing failed; the error was logged and counted.
    Failed(String),
}

/// Summary of a scheduling pass.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub jobs: BTreeMap<JobId, JobPassOutcome>,
    /// Job tasks that panicked. Their job ids are unknown.
    pub panicked: usize,
}

impl PassReport {
    pub fn get(&self, id: &str) -> Option<&JobPassOutcome> {
        self.jobs.get(&JobId::new(id))
    }

    /// Jobs for which a new run was started.
    pub fn started(&self) -> Vec<&JobId> {
        self.filter(|o| matches!(o, JobPassOutcome::Processed(PassStep::Started { .. })))
    }

    pub fn timed_out(&self) -> Vec<&JobId> {
        self.filter(|o| matches!(o, JobPassOutcome::Processed(PassStep::TimedOut)))
    }

    pub fn busy(&self) -> Vec<&JobId> {
        self.filter(|o| matches!(o, JobPassOutcome::Busy))
    }

    pub fn failed(&self) -> Vec<&JobId> {
        self.filter(|o| matches!(o, JobPassOutcome::Failed(_)))
    }

    fn filter(&self, pred: impl Fn(&JobPassOutcome) -> bool) -> Vec<&JobId> {
        self.jobs
            .iter()
            .filter(|(_, outcome)| pred(outcome))
            .map(|(id, _)| id)
            .collect()
    }
}

/// State of the scheduling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Not the leader; no store access.
    Idle,
    /// Leader; running a pass every tick.
    Leading,
    /// Loop has exited.
    Stopped,
}

/// Commands that can be sent to the scheduling loop.
pub(crate) enum WorkerCommand {
    /// Run a tick right away.
    Tick {
        response: oneshot::Sender<Option<PassReport>>,
    },
    /// Stop the loop.
    Shutdown { response: oneshot::Sender<()> },
}
