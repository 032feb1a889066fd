//! Flow execution.
//!
//! The scheduler talks to whatever actually runs flows through the
//! [`FlowExecutor`] trait: start a run and get a handle back immediately, poll
//! the handle later, terminate it if it overruns. [`LocalFlowExecutor`] runs
//! flows as tokio tasks inside the scheduler process.

mod command;
mod context;
mod local;

pub use command::run_command;
pub use context::{ContinuationStore, FlowContext, StateWrite};
pub use local::LocalFlowExecutor;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::core::flow::{FlowSpec, FlowSpecError};
use crate::core::job::RunOutcome;
use crate::core::types::{JobId, RunHandle};

/// Errors raised by a flow executor itself (not by the flow it runs).
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The flow spec does not resolve.
    #[error(transparent)]
    InvalidFlow(#[from] FlowSpecError),

    /// The executor refused to start the run.
    #[error("run rejected: {0}")]
    Rejected(String),

    /// The executor could not be reached or answered with an error.
    #[error("executor unavailable: {0}")]
    Unavailable(String),

    /// Internal lock was poisoned.
    #[error("executor lock poisoned")]
    LockPoisoned,
}

/// Errors raised by a running flow. They end the run as failed.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Command exited with non-zero status.
    #[error("command failed with exit code {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },

    /// Command exceeded its own timeout.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// Command could not be started.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Reading or writing continuation state failed.
    #[error("continuation state: {0}")]
    State(String),

    /// The flow was configured to fail.
    #[error("flow reported failure")]
    Requested,
}

/// Something that can run flows on behalf of the scheduler.
///
/// `start` must return as soon as the run is accepted. `poll` must be cheap
/// and free of side effects. `terminate` is best-effort and idempotent.
#[async_trait]
pub trait FlowExecutor: Send + Sync {
    /// Start a run of `flow` for `job_id`.
    async fn start(&self, job_id: &JobId, flow: &FlowSpec) -> Result<RunHandle, ExecutorError>;

    /// Report the state of a run.
    async fn poll(&self, handle: &RunHandle) -> Result<RunOutcome, ExecutorError>;

    /// Stop a run.
    async fn terminate(&self, handle: &RunHandle, reason: &str) -> Result<(), ExecutorError>;
}
