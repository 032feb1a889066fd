//! End-to-end scheduling with real flows.
//!
//! Jobs run through the local executor; the scheduler's clock is manual so
//! due-ness and lifetimes are decided by the test.

use crate::common::{local_scheduler, record, sleep_job, wait_for_run};
use cronward::testing::ManualClock;
use cronward::{
    CommandArgs, FlowSpec, InMemoryStore, JobId, JobPassOutcome, JobSpec, LeaseStore, PassReport,
    PassStep, RunHandle, RunOutcome, RunStatus, Scheduler, SchedulerError, SleepArgs, TriggerOutcome,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);
const WAIT: Duration = Duration::from_secs(5);

fn setup() -> (Scheduler, Arc<cronward::LocalFlowExecutor>, ManualClock) {
    let store: Arc<dyn LeaseStore> = Arc::new(InMemoryStore::new());
    let clock = ManualClock::default();
    let (scheduler, executor) = local_scheduler(store);
    (scheduler.with_clock(Arc::new(clock.clone())), executor, clock)
}

fn started(step: &PassStep) -> RunHandle {
    match step {
        PassStep::Started { handle, .. } => handle.clone(),
        other => panic!("expected a started run, got {:?}", other),
    }
}

fn started_in(report: &PassReport, id: &str) -> RunHandle {
    match report.get(id) {
        Some(JobPassOutcome::Processed(step)) => started(step),
        other => panic!("expected {} to be processed, got {:?}", id, other),
    }
}

/// Test: A job runs, its success is recorded on the next pass, and it is not
/// started again until the period has elapsed.
#[tokio::test]
async fn test_periodic_job_lifecycle() {
    let (scheduler, executor, clock) = setup();
    scheduler.schedule(sleep_job("rotate_logs", HOUR), false).await.unwrap();

    let report = scheduler.run_pass(None, false).await.unwrap();
    let handle = started_in(&report, "rotate_logs");
    assert_eq!(wait_for_run(executor.as_ref(), &handle, WAIT).await, RunOutcome::CompletedOk);

    clock.advance(Duration::from_secs(60));
    let report = scheduler.run_pass(None, false).await.unwrap();
    assert!(report.started().is_empty());

    let job = record(&scheduler, "rotate_logs").await;
    assert_eq!(job.state.last_run_status, RunStatus::Ok);
    assert!(job.state.current_run.is_none());
    assert_eq!(job.state.history.len(), 1);
    assert_eq!(job.state.history[0].status, RunStatus::Ok);
    assert_eq!(scheduler.metrics().latency_samples("rotate_logs"), 1);

    clock.advance(HOUR);
    let report = scheduler.run_pass(None, false).await.unwrap();
    assert_eq!(report.started(), vec![&JobId::new("rotate_logs")]);
}

/// Test: A failing command is recorded as an error and counted.
#[cfg(unix)]
#[tokio::test]
async fn test_failing_command_is_counted() {
    let (scheduler, executor, clock) = setup();
    let spec = JobSpec::new(
        "broken",
        FlowSpec::command(CommandArgs::new("sh").args(["-c", "exit 3"])),
        HOUR,
    );
    scheduler.schedule(spec, false).await.unwrap();

    let step = scheduler.run_now(&JobId::new("broken")).await.unwrap();
    let handle = started(&step);
    assert_eq!(
        wait_for_run(executor.as_ref(), &handle, WAIT).await,
        RunOutcome::CompletedError
    );

    clock.advance(Duration::from_secs(1));
    scheduler.run_pass(None, false).await.unwrap();

    let job = record(&scheduler, "broken").await;
    assert_eq!(job.state.last_run_status, RunStatus::Error);
    assert_eq!(scheduler.metrics().failures("broken"), 1);
    assert_eq!(scheduler.metrics().internal_errors(), 0);
}

/// Test: A run that outlives its lifetime is terminated and marked as a timeout.
#[tokio::test]
async fn test_lifetime_terminates_long_run() {
    let (scheduler, executor, clock) = setup();
    let spec = JobSpec::new(
        "reindex",
        FlowSpec::sleep(SleepArgs::new(Duration::from_secs(3600))),
        Duration::from_secs(86400),
    )
    .with_lifetime(Duration::from_secs(20 * 3600));
    scheduler.schedule(spec, false).await.unwrap();

    let report = scheduler.run_pass(None, false).await.unwrap();
    let handle = started_in(&report, "reindex");
    assert_eq!(executor.active_runs(), 1);

    clock.advance(Duration::from_secs(20 * 3600 + 1));
    let report = scheduler.run_pass(None, false).await.unwrap();
    assert_eq!(report.timed_out(), vec![&JobId::new("reindex")]);
    assert_eq!(wait_for_run(executor.as_ref(), &handle, WAIT).await, RunOutcome::CompletedError);
    assert_eq!(executor.active_runs(), 0);

    let job = record(&scheduler, "reindex").await;
    assert_eq!(job.state.last_run_status, RunStatus::Timeout);
    assert!(job.state.current_run.is_none());
    assert_eq!(scheduler.metrics().timeouts("reindex"), 1);
    assert_eq!(scheduler.metrics().failures("reindex"), 0);

    // Not due until a full period after the timed-out start.
    let report = scheduler.run_pass(None, false).await.unwrap();
    assert!(report.started().is_empty());
}

/// Test: Flows carry continuation state from one run to the next.
#[tokio::test]
async fn test_continuation_state_survives_runs() {
    let (scheduler, executor, clock) = setup();
    let spec = JobSpec::new(
        "counter",
        FlowSpec::sleep(SleepArgs::new(Duration::from_millis(5)).recording_progress()),
        HOUR,
    );
    scheduler.schedule(spec, false).await.unwrap();

    for _ in 0..3 {
        let report = scheduler.run_pass(None, false).await.unwrap();
        let handle = started_in(&report, "counter");
        assert_eq!(wait_for_run(executor.as_ref(), &handle, WAIT).await, RunOutcome::CompletedOk);
        clock.advance(HOUR + Duration::from_secs(1));
    }

    let state = scheduler.read_job_state(&JobId::new("counter")).await.unwrap();
    assert_eq!(state, Some(json!({ "iterations": 3 })));

    scheduler
        .write_job_state(&JobId::new("counter"), json!({ "iterations": 10 }))
        .await
        .unwrap();
    let report = scheduler.run_pass(None, false).await.unwrap();
    let handle = started_in(&report, "counter");
    wait_for_run(executor.as_ref(), &handle, WAIT).await;

    let state = scheduler.read_job_state(&JobId::new("counter")).await.unwrap();
    assert_eq!(state, Some(json!({ "iterations": 11 })));
}

/// Test: Disabled jobs are skipped by passes but still run on demand.
#[tokio::test]
async fn test_disabled_job_runs_only_on_demand() {
    let (scheduler, executor, _clock) = setup();
    let id = scheduler
        .create_job(JobSpec::with_generated_id(
            FlowSpec::sleep(SleepArgs::new(Duration::from_millis(5))),
            HOUR,
        ))
        .await
        .unwrap();
    assert!(id.as_str().starts_with("sleep_"));

    let report = scheduler.run_pass(None, false).await.unwrap();
    assert!(report.started().is_empty());

    let handle = started(&scheduler.run_now(&id).await.unwrap());
    assert_eq!(wait_for_run(executor.as_ref(), &handle, WAIT).await, RunOutcome::CompletedOk);

    scheduler.enable(&id).await.unwrap();
    let summaries = scheduler.list_summaries().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert!(!summaries[0].disabled);
}

/// Test: Unknown flow kinds are rejected before anything is stored.
#[tokio::test]
async fn test_unknown_flow_rejected_at_schedule_time() {
    let (scheduler, _executor, _clock) = setup();
    let spec = JobSpec::new("mystery", FlowSpec::new("teleport", json!({})), HOUR);

    let result = scheduler.schedule(spec, false).await;
    assert!(matches!(result, Err(SchedulerError::InvalidSpec(_))));
    assert!(scheduler.list_jobs().await.unwrap().is_empty());
}

/// Test: Deleting a job with a run in flight orphans the run.
#[tokio::test]
async fn test_delete_with_run_in_flight() {
    let (scheduler, executor, _clock) = setup();
    let spec = JobSpec::new(
        "long",
        FlowSpec::sleep(SleepArgs::new(Duration::from_secs(3600))),
        HOUR,
    );
    scheduler.schedule(spec, false).await.unwrap();
    scheduler.run_pass(None, false).await.unwrap();

    scheduler.delete(&JobId::new("long")).await.unwrap();
    assert!(matches!(
        scheduler.get_job(&JobId::new("long")).await,
        Err(SchedulerError::JobNotFound(_))
    ));
    assert_eq!(executor.active_runs(), 1);

    let report = scheduler.run_pass(None, false).await.unwrap();
    assert!(report.jobs.is_empty());
}

/// Test: Waiting on a forced run stops it once the wait runs out and records
/// the result, so no stored handle outlives its run.
#[tokio::test]
async fn test_forced_run_stopped_after_wait() {
    let (scheduler, executor, _clock) = setup();
    let spec = JobSpec::new(
        "backfill",
        FlowSpec::sleep(SleepArgs::new(Duration::from_secs(3600))),
        HOUR,
    );
    scheduler.schedule(spec, false).await.unwrap();

    let outcome = scheduler
        .run_now_and_wait(
            &JobId::new("backfill"),
            Duration::from_millis(100),
            Duration::from_millis(10),
        )
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        TriggerOutcome::Stopped { status: RunStatus::Error, .. }
    ));
    assert_eq!(executor.active_runs(), 0);

    let job = record(&scheduler, "backfill").await;
    assert!(job.state.current_run.is_none());
    assert_eq!(job.state.last_run_status, RunStatus::Error);
}

/// Test: A short forced run is waited on and recorded as finished.
#[tokio::test]
async fn test_forced_run_waited_to_completion() {
    let (scheduler, _executor, _clock) = setup();
    scheduler.schedule(sleep_job("quick", HOUR), false).await.unwrap();

    let outcome = scheduler
        .run_now_and_wait(&JobId::new("quick"), WAIT, Duration::from_millis(10))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        TriggerOutcome::Finished { status: RunStatus::Ok, .. }
    ));
    assert_eq!(record(&scheduler, "quick").await.state.history.len(), 1);
}
