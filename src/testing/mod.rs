//! Testing utilities for users of the cronward library.
//!
//! - [`ManualClock`]: a clock that only moves when told to
//! - [`ScriptedExecutor`]: a flow executor whose run outcomes are set by the test
//!
//! # Example
//!
//! ```
//! use cronward::core::clock::Clock;
//! use cronward::testing::ManualClock;
//! use std::time::Duration;
//!
//! let clock = ManualClock::default();
//! let before = clock.now();
//! clock.advance(Duration::from_secs(60));
//! assert_eq!((clock.now() - before).num_seconds(), 60);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::core::clock::Clock;
use crate::core::flow::FlowSpec;
use crate::core::job::RunOutcome;
use crate::core::types::{JobId, RunHandle};
use crate::execution::{ExecutorError, FlowExecutor};

/// A clock that stands still until advanced.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = lock(&self.now);
        *now += delta;
    }

    /// Jump to an absolute time.
    pub fn set(&self, to: DateTime<Utc>) {
        *lock(&self.now) = to;
    }
}

impl Default for ManualClock {
    /// Starts at 2024-01-01T00:00:00Z.
    fn default() -> Self {
        Self::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

#[derive(Default)]
struct ScriptState {
    next_run: u64,
    outcomes: HashMap<RunHandle, RunOutcome>,
    started: Vec<(JobId, RunHandle)>,
    terminated: Vec<(RunHandle, String)>,
    start_failures: Vec<String>,
    poll_failures: Vec<String>,
    terminate_failures: Vec<String>,
}

/// A flow executor driven entirely by the test.
///
/// Every started run reports [`RunOutcome::Running`] until the test changes
/// it. Handles are `run-1`, `run-2`, ... in start order. Clones share state.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a run report `outcome` from now on.
    pub fn set_outcome(&self, handle: &RunHandle, outcome: RunOutcome) {
        lock(&self.state).outcomes.insert(handle.clone(), outcome);
    }

    /// Finish every run that is still running.
    pub fn complete_all(&self, outcome: RunOutcome) {
        let mut state = lock(&self.state);
        for value in state.outcomes.values_mut() {
            if *value == RunOutcome::Running {
                *value = outcome;
            }
        }
    }

    /// Make the next `start` call fail.
    pub fn fail_next_start(&self, message: impl Into<String>) {
        lock(&self.state).start_failures.push(message.into());
    }

    /// Make the next `poll` call fail.
    pub fn fail_next_poll(&self, message: impl Into<String>) {
        lock(&self.state).poll_failures.push(message.into());
    }

    /// Make the next `terminate` call fail.
    pub fn fail_next_terminate(&self, message: impl Into<String>) {
        lock(&self.state).terminate_failures.push(message.into());
    }

    /// Runs started so far, in order.
    pub fn started(&self) -> Vec<(JobId, RunHandle)> {
        lock(&self.state).started.clone()
    }

    /// Number of runs started for a job.
    pub fn start_count(&self, job_id: &str) -> usize {
        lock(&self.state)
            .started
            .iter()
            .filter(|(id, _)| id.as_str() == job_id)
            .count()
    }

    /// Terminate calls so far with their reasons.
    pub fn terminated(&self) -> Vec<(RunHandle, String)> {
        lock(&self.state).terminated.clone()
    }
}

#[async_trait]
impl FlowExecutor for ScriptedExecutor {
    async fn start(&self, job_id: &JobId, flow: &FlowSpec) -> Result<RunHandle, ExecutorError> {
        flow.resolve()?;
        let mut state = lock(&self.state);
        if let Some(message) = state.start_failures.pop() {
            return Err(ExecutorError::Rejected(message));
        }
        state.next_run += 1;
        let handle = RunHandle::new(format!("run-{}", state.next_run));
        state.outcomes.insert(handle.clone(), RunOutcome::Running);
        state.started.push((job_id.clone(), handle.clone()));
        Ok(handle)
    }

    async fn poll(&self, handle: &RunHandle) -> Result<RunOutcome, ExecutorError> {
        let mut state = lock(&self.state);
        if let Some(message) = state.poll_failures.pop() {
            return Err(ExecutorError::Unavailable(message));
        }
        state
            .outcomes
            .get(handle)
            .copied()
            .ok_or_else(|| ExecutorError::Unavailable(format!("unknown run {}", handle)))
    }

    async fn terminate(&self, handle: &RunHandle, reason: &str) -> Result<(), ExecutorError> {
        let mut state = lock(&self.state);
        if let Some(message) = state.terminate_failures.pop() {
            return Err(ExecutorError::Unavailable(message));
        }
        state.terminated.push((handle.clone(), reason.to_string()));
        if let Some(outcome) = state.outcomes.get_mut(handle) {
            if *outcome == RunOutcome::Running {
                *outcome = RunOutcome::CompletedError;
            }
        }
        Ok(())
    }
}

/// Test doubles keep working after a panicking test thread poisoned a lock.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
