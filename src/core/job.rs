//! Cron job records and their run-state machine.
//!
//! A [`JobRecord`] pairs an immutable [`JobSpec`] with the mutable
//! [`JobState`] persisted alongside it. All decisions about a job (is it due,
//! did its run finish, has it overrun its lifetime) are pure functions of a
//! record snapshot, the current time and, where a run is tracked, the outcome
//! reported by a single executor poll.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::flow::{FlowSpec, FlowSpecError, ResolvedFlow};
use super::schedule::{humane, humane_opt};
use super::types::{JobId, RunHandle};

/// Reason given to the executor when a run is killed for overrunning.
pub const LIFETIME_EXCEEDED_REASON: &str = "lifetime exceeded";

/// Errors that make a job spec unschedulable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobSpecError {
    /// Job identifier is empty.
    #[error("job identifier must not be empty")]
    BlankId,

    /// Periodicity is zero.
    #[error("periodicity of job '{0}' must be greater than zero")]
    ZeroPeriodicity(String),

    /// Lifetime is set to zero.
    #[error("lifetime of job '{0}' must be greater than zero when set")]
    ZeroLifetime(String),

    /// Flow does not resolve.
    #[error(transparent)]
    Flow(#[from] FlowSpecError),
}

/// Status of the most recent finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// No run has finished yet.
    #[default]
    Unset,
    /// Run completed successfully.
    Ok,
    /// Run completed with an error.
    Error,
    /// Run was terminated for exceeding its lifetime.
    Timeout,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Unset => "unset",
            RunStatus::Ok => "ok",
            RunStatus::Error => "error",
            RunStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What polling the executor reported for a tracked run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Running,
    CompletedOk,
    CompletedError,
}

impl RunOutcome {
    /// The status a terminal outcome translates to.
    pub fn terminal_status(&self) -> Option<RunStatus> {
        match self {
            RunOutcome::Running => None,
            RunOutcome::CompletedOk => Some(RunStatus::Ok),
            RunOutcome::CompletedError => Some(RunStatus::Error),
        }
    }
}

/// Definition of a cron job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Unique job identifier.
    pub id: JobId,
    /// Time between scheduled runs.
    #[serde(with = "humane")]
    pub periodicity: Duration,
    /// Maximum time a single run may take before it is terminated.
    #[serde(default, with = "humane_opt", skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<Duration>,
    /// Whether a new run may start while the previous one is still active.
    #[serde(default)]
    pub allow_overruns: bool,
    /// Flow launched on every run.
    pub flow: FlowSpec,
}

impl JobSpec {
    /// Create a new job spec with no lifetime limit and overruns disallowed.
    pub fn new(id: impl Into<JobId>, flow: FlowSpec, periodicity: Duration) -> Self {
        Self {
            id: id.into(),
            periodicity,
            lifetime: None,
            allow_overruns: false,
            flow,
        }
    }

    /// Create a job spec whose identifier is derived from the flow tag plus a
    /// random suffix, e.g. `command_40412`.
    pub fn with_generated_id(flow: FlowSpec, periodicity: Duration) -> Self {
        let suffix = (Uuid::new_v4().as_u128() & 0xFFFF) as u16;
        let id = JobId::new(format!("{}_{}", flow.flow, suffix));
        Self::new(id, flow, periodicity)
    }

    /// Set the maximum run lifetime.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Allow or forbid overlapping runs.
    pub fn with_allow_overruns(mut self, allow: bool) -> Self {
        self.allow_overruns = allow;
        self
    }

    /// Check that the spec can be scheduled and resolve its flow.
    pub fn validate(&self) -> Result<ResolvedFlow, JobSpecError> {
        if self.id.is_blank() {
            return Err(JobSpecError::BlankId);
        }
        if self.periodicity.is_zero() {
            return Err(JobSpecError::ZeroPeriodicity(self.id.to_string()));
        }
        if self.lifetime.is_some_and(|l| l.is_zero()) {
            return Err(JobSpecError::ZeroLifetime(self.id.to_string()));
        }
        Ok(self.flow.resolve()?)
    }
}

/// One entry of a job's run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEntry {
    pub handle: RunHandle,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// `Unset` while the run is in flight or after it stopped being tracked.
    #[serde(default)]
    pub status: RunStatus,
}

/// Mutable, persisted state of a cron job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_run: Option<RunHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run_status: RunStatus,
    /// Opaque progress blob owned by the job's flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation: Option<Value>,
    /// Most recent runs, oldest first.
    #[serde(default)]
    pub history: Vec<RunEntry>,
}

/// A run that just reached a terminal status.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub handle: RunHandle,
    pub status: RunStatus,
    /// Time since the run started, if the start time is known and not in the future.
    pub latency: Option<Duration>,
}

/// A job spec together with its persisted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub spec: JobSpec,
    #[serde(default)]
    pub state: JobState,
}

impl JobRecord {
    /// Create a record for a job that has never run.
    pub fn new(spec: JobSpec, disabled: bool) -> Self {
        Self {
            spec,
            state: JobState {
                disabled,
                ..JobState::default()
            },
        }
    }

    pub fn id(&self) -> &JobId {
        &self.spec.id
    }

    /// True if a run is tracked and the executor reports it still running.
    pub fn is_running(&self, outcome: Option<RunOutcome>) -> bool {
        self.state.current_run.is_some() && outcome == Some(RunOutcome::Running)
    }

    /// Whether a new run should start at `now`.
    ///
    /// Only meaningful after [`reconcile`](Self::reconcile) has been applied
    /// for the current pass, otherwise a finished run still blocks the job.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.state.disabled {
            return false;
        }

        let Some(start) = self.state.last_run_start else {
            return true;
        };

        let Some(next) = add_duration(start, self.spec.periodicity) else {
            return false;
        };

        now > next && (self.spec.allow_overruns || self.state.current_run.is_none())
    }

    /// True if the tracked run is still going and has outlived its lifetime.
    pub fn lifetime_exceeded(&self, outcome: Option<RunOutcome>, now: DateTime<Utc>) -> bool {
        if !self.is_running(outcome) {
            return false;
        }
        let (Some(lifetime), Some(start)) = (self.spec.lifetime, self.state.last_run_start) else {
            return false;
        };
        add_duration(start, lifetime).is_some_and(|deadline| now > deadline)
    }

    /// Fold a terminal poll outcome into the record.
    ///
    /// Returns the completion if the tracked run finished; the handle is
    /// cleared in the same step that records its status.
    pub fn reconcile(&mut self, outcome: Option<RunOutcome>, now: DateTime<Utc>) -> Option<Completion> {
        let status = outcome?.terminal_status()?;
        self.finish_current(status, now)
    }

    /// Mark the tracked run as timed out.
    ///
    /// Returns `None` when no run is tracked, which makes repeated calls
    /// harmless.
    pub fn time_out(&mut self, now: DateTime<Utc>) -> Option<Completion> {
        self.finish_current(RunStatus::Timeout, now)
    }

    /// Record a freshly started run.
    ///
    /// Returns the handle it replaced, which is no longer tracked.
    pub fn start_run(
        &mut self,
        handle: RunHandle,
        now: DateTime<Utc>,
        history_limit: usize,
    ) -> Option<RunHandle> {
        let replaced = self.state.current_run.replace(handle.clone());
        self.state.last_run_start = Some(now);

        self.state.history.push(RunEntry {
            handle,
            started_at: now,
            finished_at: None,
            status: RunStatus::Unset,
        });
        let len = self.state.history.len();
        if len > history_limit {
            self.state.history.drain(..len - history_limit);
        }

        replaced
    }

    /// Replace the spec, keeping all run state.
    pub fn replace_spec(&mut self, spec: JobSpec) {
        self.spec = spec;
    }

    /// Set the disabled flag. Returns true if it changed.
    pub fn set_disabled(&mut self, disabled: bool) -> bool {
        let changed = self.state.disabled != disabled;
        self.state.disabled = disabled;
        changed
    }

    /// Short view used in listings.
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.spec.id.clone(),
            flow: self.spec.flow.flow.clone(),
            periodicity: self.spec.periodicity,
            disabled: self.state.disabled,
            running: self.state.current_run.is_some(),
            last_run_start: self.state.last_run_start,
            last_run_status: self.state.last_run_status,
        }
    }

    fn finish_current(&mut self, status: RunStatus, now: DateTime<Utc>) -> Option<Completion> {
        let handle = self.state.current_run.take()?;
        self.state.last_run_status = status;

        if let Some(entry) = self
            .state
            .history
            .iter_mut()
            .rev()
            .find(|entry| entry.handle == handle && entry.finished_at.is_none())
        {
            entry.finished_at = Some(now);
            entry.status = status;
        }

        let latency = self
            .state
            .last_run_start
            .and_then(|start| (now - start).to_std().ok());

        Some(Completion {
            handle,
            status,
            latency,
        })
    }
}

/// Listing view of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub flow: String,
    #[serde(with = "humane")]
    pub periodicity: Duration,
    pub disabled: bool,
    /// A run handle is tracked. Not confirmed against the executor.
    pub running: bool,
    pub last_run_start: Option<DateTime<Utc>>,
    pub last_run_status: RunStatus,
}

fn add_duration(start: DateTime<Utc>, duration: Duration) -> Option<DateTime<Utc>> {
    let delta = chrono::Duration::from_std(duration).ok()?;
    start.checked_add_signed(delta)
}
