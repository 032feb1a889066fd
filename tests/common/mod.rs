//! Common test utilities shared across integration tests.

use cronward::execution::{ContinuationStore, LocalFlowExecutor};
use cronward::{
    FlowExecutor, FlowSpec, JobId, JobRecord, JobSpec, LeaseStore, RunHandle, RunOutcome,
    Scheduler, SleepArgs,
};
use std::sync::Arc;
use std::time::Duration;

/// A job whose flow sleeps for a few milliseconds.
pub fn sleep_job(id: &str, periodicity: Duration) -> JobSpec {
    JobSpec::new(
        id,
        FlowSpec::sleep(SleepArgs::new(Duration::from_millis(10))),
        periodicity,
    )
}

/// Scheduler over `store` with a local executor whose flows can reach
/// continuation state.
pub fn local_scheduler(store: Arc<dyn LeaseStore>) -> (Scheduler, Arc<LocalFlowExecutor>) {
    let lease = Duration::from_secs(30);
    let wait = Duration::from_secs(5);
    let continuation = ContinuationStore::new(Arc::clone(&store), lease, wait);
    let executor = Arc::new(LocalFlowExecutor::new().with_continuation(continuation));
    let scheduler = Scheduler::new(store, executor.clone())
        .unwrap()
        .with_lease_duration(lease)
        .with_schedule_wait(wait);
    (scheduler, executor)
}

/// Wait for a run to leave the running state, polling the executor.
///
/// # Panics
///
/// Panics if the run is still going after `timeout`.
pub async fn wait_for_run(
    executor: &dyn FlowExecutor,
    handle: &RunHandle,
    timeout: Duration,
) -> RunOutcome {
    let start = tokio::time::Instant::now();
    loop {
        let outcome = executor.poll(handle).await.unwrap();
        if outcome != RunOutcome::Running {
            return outcome;
        }
        if start.elapsed() > timeout {
            panic!("Timeout waiting for run {} to finish", handle);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Fetch a job record, panicking if it is missing.
pub async fn record(scheduler: &Scheduler, id: &str) -> JobRecord {
    scheduler.get_job(&JobId::new(id)).await.unwrap()
}
