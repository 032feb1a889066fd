//! In-process flow executor.
//!
//! Each run is a tokio task. Run slots are kept in memory, so handles do not
//! survive a restart: polling a handle this executor has never seen reports
//! the run as failed, which lets the scheduler clear it and move on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::AbortHandle;

use super::command::run_command;
use super::context::{ContinuationStore, FlowContext};
use super::{ExecutorError, FlowError, FlowExecutor};
use crate::core::flow::{FlowSpec, ResolvedFlow, SleepArgs};
use crate::core::job::RunOutcome;
use crate::core::types::{JobId, RunHandle};

/// Finished runs are forgotten after this long.
const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

struct RunSlot {
    job_id: JobId,
    outcome: RunOutcome,
    abort: Option<AbortHandle>,
    finished_at: Option<DateTime<Utc>>,
}

type RunTable = Arc<RwLock<HashMap<RunHandle, RunSlot>>>;

/// Runs flows as tokio tasks in the current process.
pub struct LocalFlowExecutor {
    runs: RunTable,
    continuation: Option<ContinuationStore>,
    retention: Duration,
}

impl LocalFlowExecutor {
    /// Create an executor whose flows cannot touch continuation state.
    pub fn new() -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
            continuation: None,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Give flows access to their job's continuation state.
    pub fn with_continuation(mut self, store: ContinuationStore) -> Self {
        self.continuation = Some(store);
        self
    }

    /// How long finished runs stay pollable.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Number of runs currently executing.
    pub fn active_runs(&self) -> usize {
        self.runs
            .read()
            .map(|runs| {
                runs.values()
                    .filter(|slot| slot.outcome == RunOutcome::Running)
                    .count()
            })
            .unwrap_or(0)
    }

    fn prune_finished(&self, now: DateTime<Utc>) -> Result<(), ExecutorError> {
        let retention =
            chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);
        let mut runs = self.runs.write().map_err(|_| ExecutorError::LockPoisoned)?;
        runs.retain(|_, slot| match slot.finished_at {
            Some(finished) => now.signed_duration_since(finished) < retention,
            None => true,
        });
        Ok(())
    }
}

impl Default for LocalFlowExecutor {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_flow(flow: ResolvedFlow, ctx: FlowContext) -> Result<(), FlowError> {
    match flow {
        ResolvedFlow::Command(args) => run_command(&args).await,
        ResolvedFlow::Sleep(args) => run_sleep(&args, &ctx).await,
    }
}

async fn run_sleep(args: &SleepArgs, ctx: &FlowContext) -> Result<(), FlowError> {
    tokio::time::sleep(args.duration).await;

    if args.record_progress {
        let previous = ctx
            .read_state()
            .await?
            .and_then(|state| state.get("iterations").and_then(|v| v.as_u64()))
            .unwrap_or(0);
        ctx.write_state(json!({ "iterations": previous + 1 })).await?;
    }

    if args.fail {
        return Err(FlowError::Requested);
    }
    Ok(())
}

fn finish(runs: &RunTable, handle: &RunHandle, outcome: RunOutcome) {
    match runs.write() {
        Ok(mut runs) => {
            if let Some(slot) = runs.get_mut(handle) {
                if slot.outcome == RunOutcome::Running {
                    slot.outcome = outcome;
                    slot.abort = None;
                    slot.finished_at = Some(Utc::now());
                }
            }
        }
        Err(_) => tracing::error!(run = %handle, "Run table lock poisoned, outcome dropped"),
    }
}

#[async_trait]
impl FlowExecutor for LocalFlowExecutor {
    async fn start(&self, job_id: &JobId, flow: &FlowSpec) -> Result<RunHandle, ExecutorError> {
        let resolved = flow.resolve()?;
        self.prune_finished(Utc::now())?;

        let handle = RunHandle::generate();
        {
            let mut runs = self.runs.write().map_err(|_| ExecutorError::LockPoisoned)?;
            runs.insert(
                handle.clone(),
                RunSlot {
                    job_id: job_id.clone(),
                    outcome: RunOutcome::Running,
                    abort: None,
                    finished_at: None,
                },
            );
        }

        let ctx = FlowContext::new(job_id.clone(), handle.clone(), self.continuation.clone());
        let runs = Arc::clone(&self.runs);
        let task_handle = handle.clone();
        let task_job = job_id.clone();
        let task = tokio::spawn(async move {
            let outcome = match run_flow(resolved, ctx).await {
                Ok(()) => {
                    tracing::info!(job_id = %task_job, run = %task_handle, "Flow completed");
                    RunOutcome::CompletedOk
                }
                Err(e) => {
                    tracing::warn!(job_id = %task_job, run = %task_handle, error = %e, "Flow failed");
                    RunOutcome::CompletedError
                }
            };
            finish(&runs, &task_handle, outcome);
        });

        let mut runs = self.runs.write().map_err(|_| ExecutorError::LockPoisoned)?;
        if let Some(slot) = runs.get_mut(&handle) {
            if slot.outcome == RunOutcome::Running {
                slot.abort = Some(task.abort_handle());
            }
        }

        tracing::debug!(job_id = %job_id, run = %handle, flow = %flow.flow, "Flow started");
        Ok(handle)
    }

    async fn poll(&self, handle: &RunHandle) -> Result<RunOutcome, ExecutorError> {
        let runs = self.runs.read().map_err(|_| ExecutorError::LockPoisoned)?;
        match runs.get(handle) {
            Some(slot) => Ok(slot.outcome),
            None => {
                tracing::warn!(run = %handle, "Unknown run handle, reporting it as failed");
                Ok(RunOutcome::CompletedError)
            }
        }
    }

    async fn terminate(&self, handle: &RunHandle, reason: &str) -> Result<(), ExecutorError> {
        let mut runs = self.runs.write().map_err(|_| ExecutorError::LockPoisoned)?;
        let Some(slot) = runs.get_mut(handle) else {
            return Ok(());
        };
        if slot.outcome != RunOutcome::Running {
            return Ok(());
        }

        if let Some(abort) = slot.abort.take() {
            abort.abort();
        }
        slot.outcome = RunOutcome::CompletedError;
        slot.finished_at = Some(Utc::now());
        tracing::info!(job_id = %slot.job_id, run = %handle, reason, "Flow terminated");
        Ok(())
    }
}
