//! Scheduling loop integration tests.
//!
//! Tests that verify leadership gating, failover between replicas, and that
//! the loop survives failures inside a pass.

use crate::common::sleep_job;
use cronward::testing::ScriptedExecutor;
use cronward::{
    CronWorker, InMemoryStore, JobId, LeaseStore, LeadershipFlag, RunOutcome, Scheduler,
    WorkerState,
};
use std::sync::Arc;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);

fn replica(
    store: Arc<dyn LeaseStore>,
    executor: &ScriptedExecutor,
    leader: bool,
) -> (CronWorker, LeadershipFlag, Scheduler) {
    let scheduler = Scheduler::new(store, Arc::new(executor.clone())).unwrap();
    let flag = LeadershipFlag::new(leader);
    let worker = CronWorker::new(scheduler.clone())
        .with_tick_interval(HOUR)
        .with_leadership(Arc::new(flag.clone()));
    (worker, flag, scheduler)
}

/// Test: Only the leading replica runs passes, and leadership can move.
#[tokio::test]
async fn test_leadership_failover() {
    let store: Arc<dyn LeaseStore> = Arc::new(InMemoryStore::new());
    let executor = ScriptedExecutor::new();

    let (worker_a, flag_a, scheduler_a) = replica(store.clone(), &executor, true);
    let (worker_b, flag_b, _scheduler_b) = replica(store.clone(), &executor, false);
    scheduler_a.schedule(sleep_job("vacuum", Duration::from_secs(1)), false).await.unwrap();

    let (handle_a, task_a) = worker_a.start().await;
    let (handle_b, task_b) = worker_b.start().await;

    let report = handle_a.tick_now().await.unwrap().unwrap();
    assert_eq!(report.started(), vec![&JobId::new("vacuum")]);
    assert!(handle_b.tick_now().await.unwrap().is_none());
    assert!(handle_a.is_leading().await);
    assert!(!handle_b.is_leading().await);

    // Leadership moves to b; a goes idle without touching the store.
    flag_a.set_leader(false);
    flag_b.set_leader(true);
    executor.complete_all(RunOutcome::CompletedOk);
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert!(handle_a.tick_now().await.unwrap().is_none());
    let report = handle_b.tick_now().await.unwrap().unwrap();
    assert_eq!(report.started(), vec![&JobId::new("vacuum")]);
    assert_eq!(handle_a.state().await, WorkerState::Idle);
    assert_eq!(handle_b.state().await, WorkerState::Leading);
    assert_eq!(executor.start_count("vacuum"), 2);

    handle_a.shutdown().await.unwrap();
    handle_b.shutdown().await.unwrap();
    task_a.await.unwrap();
    task_b.await.unwrap();
}

/// Test: Executor failures are counted and the loop keeps ticking.
#[tokio::test]
async fn test_loop_survives_failing_jobs() {
    let store: Arc<dyn LeaseStore> = Arc::new(InMemoryStore::new());
    let executor = ScriptedExecutor::new();
    let (worker, _flag, scheduler) = replica(store, &executor, true);
    scheduler.schedule(sleep_job("flaky", Duration::from_secs(1)), false).await.unwrap();

    let (handle, task) = worker.start().await;

    executor.fail_next_start("executor offline");
    let report = handle.tick_now().await.unwrap().unwrap();
    assert_eq!(report.failed(), vec![&JobId::new("flaky")]);
    assert_eq!(scheduler.metrics().internal_errors(), 1);

    let report = handle.tick_now().await.unwrap().unwrap();
    assert_eq!(report.started(), vec![&JobId::new("flaky")]);
    assert_eq!(handle.state().await, WorkerState::Leading);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

/// Test: The interval drives passes without manual ticks.
#[tokio::test]
async fn test_interval_ticks_run_passes() {
    let store: Arc<dyn LeaseStore> = Arc::new(InMemoryStore::new());
    let executor = ScriptedExecutor::new();
    let scheduler = Scheduler::new(store, Arc::new(executor.clone())).unwrap();
    scheduler.schedule(sleep_job("heartbeat", HOUR), false).await.unwrap();

    let worker = CronWorker::new(scheduler).with_tick_interval(Duration::from_millis(20));
    let (handle, task) = worker.start().await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while executor.start_count("heartbeat") == 0 {
        assert!(tokio::time::Instant::now() < deadline, "loop never ran a pass");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    assert_eq!(executor.start_count("heartbeat"), 1);
}
