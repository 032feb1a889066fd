//! The scheduler facade.
//!
//! [`Scheduler`] owns everything a scheduling pass needs: the lease store,
//! the flow executor, the clock and the metrics. It is cheap to clone; clones
//! share all of it.
//!
//! Every mutation of a job record happens while holding that record's lease.
//! Management operations surface errors to the caller. A scheduling pass
//! never does: each job is processed in isolation, and a failure is logged,
//! counted and left for the next pass.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::types::{JobPassOutcome, PassReport, PassStep, SchedulerError, TriggerOutcome};
use crate::core::clock::{Clock, SystemClock};
use crate::core::job::{
    Completion, JobRecord, JobSpec, JobSummary, LIFETIME_EXCEEDED_REASON, RunOutcome, RunStatus,
};
use crate::core::types::{JobId, RunHandle};
use crate::execution::{ContinuationStore, FlowExecutor, StateWrite};
use crate::metrics::CronMetrics;
use crate::storage::{Lease, LeaseAttempt, LeaseStore, StorageError, acquire_with_wait};

/// Default lease duration for a job record.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(600);

/// Default time management writes wait for a busy lease.
pub const DEFAULT_SCHEDULE_WAIT: Duration = Duration::from_secs(10);

/// Default number of jobs processed concurrently in one pass.
pub const DEFAULT_PASS_CONCURRENCY: usize = 8;

/// Default number of run history entries kept per job.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Schedules, manages and drives cron jobs.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn LeaseStore>,
    executor: Arc<dyn FlowExecutor>,
    clock: Arc<dyn Clock>,
    metrics: CronMetrics,
    lease_duration: Duration,
    schedule_wait: Duration,
    pass_concurrency: usize,
    history_limit: usize,
}

impl Scheduler {
    /// Create a scheduler with default settings and a fresh metrics registry.
    pub fn new(
        store: Arc<dyn LeaseStore>,
        executor: Arc<dyn FlowExecutor>,
    ) -> Result<Self, SchedulerError> {
        Ok(Self {
            store,
            executor,
            clock: Arc::new(SystemClock),
            metrics: CronMetrics::new()?,
            lease_duration: DEFAULT_LEASE_DURATION,
            schedule_wait: DEFAULT_SCHEDULE_WAIT,
            pass_concurrency: DEFAULT_PASS_CONCURRENCY,
            history_limit: DEFAULT_HISTORY_LIMIT,
        })
    }

    /// Set the clock used for scheduling decisions.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set how long a job lease lasts.
    ///
    /// Must comfortably exceed the time one job takes in a pass.
    pub fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    /// Set how long management writes wait for a busy lease.
    pub fn with_schedule_wait(mut self, wait: Duration) -> Self {
        self.schedule_wait = wait;
        self
    }

    /// Set how many jobs one pass processes concurrently.
    pub fn with_pass_concurrency(mut self, concurrency: usize) -> Self {
        self.pass_concurrency = concurrency.max(1);
        self
    }

    /// Set how many history entries each job keeps.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn metrics(&self) -> &CronMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn LeaseStore> {
        &self.store
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Lease-guarded access to continuation state, for wiring into executors.
    pub fn continuation_store(&self) -> ContinuationStore {
        ContinuationStore::new(
            Arc::clone(&self.store),
            self.lease_duration,
            self.schedule_wait,
        )
    }

    /// Create or update a job.
    ///
    /// Scheduling an identical spec with the same disabled flag is a no-op.
    /// Otherwise the spec and flag are overwritten under the job's lease and
    /// all run state is kept.
    pub async fn schedule(&self, spec: JobSpec, disabled: bool) -> Result<JobId, SchedulerError> {
        spec.validate()?;
        let id = spec.id.clone();

        if self.store.create(&JobRecord::new(spec.clone(), disabled)).await? {
            tracing::info!(job_id = %id, disabled, "Job scheduled");
            return Ok(id);
        }

        if let Some(existing) = self.store.get(&id).await? {
            if existing.spec == spec && existing.state.disabled == disabled {
                tracing::debug!(job_id = %id, "Job already scheduled with identical spec");
                return Ok(id);
            }
        }

        let attempt =
            acquire_with_wait(self.store.as_ref(), &id, self.lease_duration, self.schedule_wait)
                .await?;
        let (lease, mut record) = match attempt {
            LeaseAttempt::Acquired { lease, record } => (lease, record),
            LeaseAttempt::Busy => return Err(SchedulerError::JobBusy(id.to_string())),
        };

        record.replace_spec(spec);
        record.set_disabled(disabled);
        let result = self.store.update(&lease, &record).await;
        self.release(lease).await;
        result?;

        tracing::info!(job_id = %id, disabled, "Job updated");
        Ok(id)
    }

    /// Create a new job, disabled until explicitly enabled.
    pub async fn create_job(&self, spec: JobSpec) -> Result<JobId, SchedulerError> {
        spec.validate()?;
        let id = spec.id.clone();

        if !self.store.create(&JobRecord::new(spec, true)).await? {
            return Err(SchedulerError::AlreadyExists(id.to_string()));
        }
        tracing::info!(job_id = %id, "Job created disabled");
        Ok(id)
    }

    /// Allow a job to start new runs.
    pub async fn enable(&self, id: &JobId) -> Result<(), SchedulerError> {
        self.set_disabled(id, false).await
    }

    /// Stop a job from starting new runs. A run in flight is left alone.
    pub async fn disable(&self, id: &JobId) -> Result<(), SchedulerError> {
        self.set_disabled(id, true).await
    }

    async fn set_disabled(&self, id: &JobId, disabled: bool) -> Result<(), SchedulerError> {
        let (lease, mut record) = self.lease_now(id).await?;

        let result = if record.set_disabled(disabled) {
            self.store.update(&lease, &record).await
        } else {
            Ok(())
        };
        self.release(lease).await;
        result?;

        tracing::info!(job_id = %id, disabled, "Job disabled flag set");
        Ok(())
    }

    /// Remove a job unconditionally. A run in flight is orphaned.
    pub async fn delete(&self, id: &JobId) -> Result<(), SchedulerError> {
        let in_flight = self
            .store
            .get(id)
            .await?
            .and_then(|record| record.state.current_run);

        if !self.store.delete(id).await? {
            return Err(SchedulerError::JobNotFound(id.to_string()));
        }

        match in_flight {
            Some(run) => tracing::warn!(job_id = %id, run = %run, "Job deleted with a run in flight"),
            None => tracing::info!(job_id = %id, "Job deleted"),
        }
        Ok(())
    }

    /// All job identifiers, in store order.
    pub async fn list_jobs(&self) -> Result<Vec<JobId>, SchedulerError> {
        Ok(self.store.list_keys("").await?)
    }

    /// Listing view of every job.
    pub async fn list_summaries(&self) -> Result<Vec<JobSummary>, SchedulerError> {
        let mut summaries = Vec::new();
        for id in self.store.list_keys("").await? {
            if let Some(record) = self.store.get(&id).await? {
                summaries.push(record.summary());
            }
        }
        Ok(summaries)
    }

    /// Full record of a job, including run history.
    pub async fn get_job(&self, id: &JobId) -> Result<JobRecord, SchedulerError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))
    }

    /// Continuation state of a job.
    pub async fn read_job_state(&self, id: &JobId) -> Result<Option<Value>, SchedulerError> {
        Ok(self.continuation_store().read(id).await?)
    }

    /// Replace the continuation state of a job.
    pub async fn write_job_state(&self, id: &JobId, value: Value) -> Result<(), SchedulerError> {
        match self.continuation_store().write(id, value).await? {
            StateWrite::Written => Ok(()),
            StateWrite::Busy => Err(SchedulerError::JobBusy(id.to_string())),
        }
    }

    /// Force a run of one job now.
    ///
    /// Contention is reported as [`SchedulerError::JobBusy`], distinct from
    /// the job failing. A run that has overrun its lifetime is terminated
    /// instead of starting a new one.
    pub async fn run_now(&self, id: &JobId) -> Result<PassStep, SchedulerError> {
        let (lease, record) = self.lease_now(id).await?;
        let now = self.clock.now();
        let result = self.execute_run_pass(&lease, record, now, true).await;
        self.release(lease).await;
        result
    }

    /// Force a run of one job and stay with it until it ends.
    ///
    /// Runs live in the executor, so a caller that exits while its run is
    /// still going leaves the record tracking a run nobody drives. This
    /// polls the run every `poll_interval`; once `wait` has passed the run
    /// is terminated. Either way the record is reconciled before returning.
    /// Reconciling never starts another run.
    pub async fn run_now_and_wait(
        &self,
        id: &JobId,
        wait: Duration,
        poll_interval: Duration,
    ) -> Result<TriggerOutcome, SchedulerError> {
        let handle = match self.run_now(id).await? {
            PassStep::Started { handle, .. } => handle,
            other => return Ok(TriggerOutcome::NotStarted(other)),
        };

        let deadline = tokio::time::Instant::now() + wait;
        let mut stopped = false;
        while self.executor.poll(&handle).await? == RunOutcome::Running {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(job_id = %id, run = %handle, ?wait, "Forced run outlived the wait, terminating");
                self.executor
                    .terminate(&handle, "forced run outlived its wait")
                    .await?;
                stopped = true;
                break;
            }
            tokio::time::sleep(poll_interval).await;
        }

        let status = self.settle(id, &handle).await?;
        Ok(if stopped {
            TriggerOutcome::Stopped { handle, status }
        } else {
            TriggerOutcome::Finished { handle, status }
        })
    }

    /// Record the end of `handle` without starting anything.
    async fn settle(&self, id: &JobId, handle: &RunHandle) -> Result<RunStatus, SchedulerError> {
        let attempt =
            acquire_with_wait(self.store.as_ref(), id, self.lease_duration, self.schedule_wait)
                .await?;
        let (lease, mut record) = match attempt {
            LeaseAttempt::Acquired { lease, record } => (lease, record),
            LeaseAttempt::Busy => return Err(SchedulerError::JobBusy(id.to_string())),
        };

        let result = self.settle_under_lease(&lease, &mut record, handle).await;
        self.release(lease).await;
        result
    }

    async fn settle_under_lease(
        &self,
        lease: &Lease,
        record: &mut JobRecord,
        handle: &RunHandle,
    ) -> Result<RunStatus, SchedulerError> {
        // Someone else already recorded this run.
        if record.state.current_run.as_ref() != Some(handle) {
            return Ok(record.state.last_run_status);
        }

        let outcome = self.executor.poll(handle).await?;
        if let Some(completion) = record.reconcile(Some(outcome), self.clock.now()) {
            self.store.update(lease, record).await?;
            self.record_completion(record.id(), &completion);
        }
        Ok(record.state.last_run_status)
    }

    /// Attempt every job (or the given ones) once.
    ///
    /// Only listing the jobs can fail the pass as a whole. Per-job errors end
    /// up in the report and the internal error counter.
    pub async fn run_pass(
        &self,
        job_ids: Option<&[JobId]>,
        force: bool,
    ) -> Result<PassReport, SchedulerError> {
        let ids = match job_ids {
            Some(ids) => ids.to_vec(),
            None => self.store.list_keys("").await?,
        };

        let permits = Arc::new(Semaphore::new(self.pass_concurrency));
        let mut tasks = JoinSet::new();
        for id in ids {
            let scheduler = self.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => scheduler.process_job(&id, force).await,
                    Err(e) => JobPassOutcome::Failed(e.to_string()),
                };
                (id, outcome)
            });
        }

        let mut report = PassReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, outcome)) => {
                    report.jobs.insert(id, outcome);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Job task panicked during pass");
                    self.metrics.record_internal_error();
                    report.panicked += 1;
                }
            }
        }

        tracing::debug!(
            jobs = report.jobs.len(),
            started = report.started().len(),
            busy = report.busy().len(),
            failed = report.failed().len(),
            "Scheduling pass finished"
        );
        Ok(report)
    }

    async fn process_job(&self, id: &JobId, force: bool) -> JobPassOutcome {
        let attempt = match self.store.try_acquire_lease(id, self.lease_duration).await {
            Ok(attempt) => attempt,
            Err(StorageError::NotFound(_)) => {
                tracing::debug!(job_id = %id, "Job vanished before it could be leased");
                return JobPassOutcome::Missing;
            }
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Failed to lease job");
                self.metrics.record_internal_error();
                return JobPassOutcome::Failed(e.to_string());
            }
        };

        let (lease, record) = match attempt {
            LeaseAttempt::Acquired { lease, record } => (lease, record),
            LeaseAttempt::Busy => {
                tracing::debug!(job_id = %id, "Job leased elsewhere, skipping");
                return JobPassOutcome::Busy;
            }
        };

        let now = self.clock.now();
        let result = self.execute_run_pass(&lease, record, now, force).await;
        self.release(lease).await;

        match result {
            Ok(step) => JobPassOutcome::Processed(step),
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Job failed during scheduling pass");
                self.metrics.record_internal_error();
                JobPassOutcome::Failed(e.to_string())
            }
        }
    }

    /// The per-job algorithm, run while holding the job's lease.
    async fn execute_run_pass(
        &self,
        lease: &Lease,
        mut record: JobRecord,
        now: chrono::DateTime<chrono::Utc>,
        force: bool,
    ) -> Result<PassStep, SchedulerError> {
        let id = record.id().clone();

        let outcome = match record.state.current_run.as_ref() {
            Some(handle) => Some(self.executor.poll(handle).await?),
            None => None,
        };

        if record.lifetime_exceeded(outcome, now) {
            if let Some(handle) = record.state.current_run.clone() {
                self.executor
                    .terminate(&handle, LIFETIME_EXCEEDED_REASON)
                    .await?;
            }
            let completion = record.time_out(now);
            self.store.update(lease, &record).await?;

            if let Some(completion) = completion {
                tracing::warn!(job_id = %id, run = %completion.handle, "Run exceeded its lifetime and was terminated");
                self.record_completion(&id, &completion);
            }
            return Ok(PassStep::TimedOut);
        }

        let completion = record.reconcile(outcome, now);
        if let Some(completion) = &completion {
            self.store.update(lease, &record).await?;
            self.record_completion(&id, completion);
        }
        let reconciled = completion.map(|c| c.status);

        if !force && !record.is_due(now) {
            return Ok(PassStep::Idle { reconciled });
        }

        let handle = self.executor.start(&id, &record.spec.flow).await?;
        if let Some(previous) = record.start_run(handle.clone(), now, self.history_limit) {
            tracing::warn!(job_id = %id, run = %previous, "Overrun started; previous run is no longer tracked");
        }

        if let Err(e) = self.store.update(lease, &record).await {
            // The run is not recorded anywhere, so nothing would ever reap it.
            if let Err(term) = self.executor.terminate(&handle, "run could not be recorded").await {
                tracing::warn!(job_id = %id, run = %handle, error = %term, "Failed to stop unrecorded run");
            }
            return Err(e.into());
        }

        tracing::info!(job_id = %id, run = %handle, forced = force, "Run started");
        Ok(PassStep::Started { handle, reconciled })
    }

    fn record_completion(&self, id: &JobId, completion: &Completion) {
        match completion.status {
            RunStatus::Error => {
                tracing::warn!(job_id = %id, run = %completion.handle, "Run finished with error");
                self.metrics.record_failure(id.as_str());
            }
            RunStatus::Timeout => self.metrics.record_timeout(id.as_str()),
            _ => tracing::info!(job_id = %id, run = %completion.handle, "Run finished"),
        }
        if let Some(latency) = completion.latency {
            self.metrics.observe_latency(id.as_str(), latency);
        }
    }

    async fn lease_now(&self, id: &JobId) -> Result<(Lease, JobRecord), SchedulerError> {
        match self.store.try_acquire_lease(id, self.lease_duration).await? {
            LeaseAttempt::Acquired { lease, record } => Ok((lease, record)),
            LeaseAttempt::Busy => Err(SchedulerError::JobBusy(id.to_string())),
        }
    }

    async fn release(&self, lease: Lease) {
        let key = lease.key().clone();
        if let Err(e) = self.store.release(lease).await {
            tracing::warn!(job_id = %key, error = %e, "Failed to release lease; it will expire");
        }
    }
}
