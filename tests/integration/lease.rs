//! Lease contention integration tests.
//!
//! Several schedulers share one store, the way replicas share a database.
//! Each due job must be started exactly once no matter how passes interleave.

use crate::common::sleep_job;
use cronward::storage::LeaseAttempt;
use cronward::testing::ScriptedExecutor;
use cronward::{InMemoryStore, JobId, JobPassOutcome, LeaseStore, Scheduler, SchedulerError};
use std::sync::Arc;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);

fn scheduler(store: Arc<dyn LeaseStore>, executor: &ScriptedExecutor) -> Scheduler {
    Scheduler::new(store, Arc::new(executor.clone()))
        .unwrap()
        .with_schedule_wait(Duration::from_millis(300))
}

async fn schedule_jobs(scheduler: &Scheduler, count: usize) {
    for i in 0..count {
        scheduler
            .schedule(sleep_job(&format!("job_{:02}", i), HOUR), false)
            .await
            .unwrap();
    }
}

async fn assert_each_started_once(stores: Vec<Arc<dyn LeaseStore>>) {
    let executor = ScriptedExecutor::new();
    let schedulers: Vec<Scheduler> = stores
        .into_iter()
        .map(|store| scheduler(store, &executor))
        .collect();
    schedule_jobs(&schedulers[0], 20).await;

    let passes = schedulers.iter().map(|s| {
        let s = s.clone();
        tokio::spawn(async move { s.run_pass(None, false).await.unwrap() })
    });
    let reports: Vec<_> = join_all(passes).await;

    for i in 0..20 {
        assert_eq!(
            executor.start_count(&format!("job_{:02}", i)),
            1,
            "job_{:02} started more or fewer than once",
            i
        );
    }
    let started: usize = reports.iter().map(|r| r.started().len()).sum();
    assert_eq!(started, 20);
}

async fn join_all<T: Send + 'static>(
    handles: impl Iterator<Item = tokio::task::JoinHandle<T>>,
) -> Vec<T> {
    let mut out = Vec::new();
    for handle in handles.collect::<Vec<_>>() {
        out.push(handle.await.unwrap());
    }
    out
}

/// Test: Concurrent passes over a shared in-memory store start each job once.
#[tokio::test]
async fn test_concurrent_passes_memory_store() {
    let store: Arc<dyn LeaseStore> = Arc::new(InMemoryStore::new());
    assert_each_started_once(vec![store.clone(), store.clone(), store]).await;
}

/// Test: Two processes on one SQLite file start each job once.
#[tokio::test]
async fn test_concurrent_passes_sqlite_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cron.db");
    let a: Arc<dyn LeaseStore> = Arc::new(cronward::SqliteStore::new(&path).await.unwrap());
    let b: Arc<dyn LeaseStore> = Arc::new(cronward::SqliteStore::new(&path).await.unwrap());
    assert_each_started_once(vec![a, b]).await;
}

/// Test: A job leased elsewhere is skipped, then picked up once the lease expires.
#[tokio::test]
async fn test_expired_lease_is_taken_over() {
    let store = Arc::new(InMemoryStore::new());
    let executor = ScriptedExecutor::new();
    let scheduler = scheduler(store.clone(), &executor);
    scheduler.schedule(sleep_job("backup", HOUR), false).await.unwrap();

    // A holder that will crash without releasing.
    let held = store
        .try_acquire_lease(&JobId::new("backup"), Duration::from_millis(100))
        .await
        .unwrap();
    assert!(matches!(held, LeaseAttempt::Acquired { .. }));

    let report = scheduler.run_pass(None, false).await.unwrap();
    assert_eq!(report.get("backup"), Some(&JobPassOutcome::Busy));
    assert_eq!(executor.start_count("backup"), 0);

    tokio::time::sleep(Duration::from_millis(150)).await;

    let report = scheduler.run_pass(None, false).await.unwrap();
    assert_eq!(report.started(), vec![&JobId::new("backup")]);
    assert_eq!(executor.start_count("backup"), 1);
}

/// Test: The crashed holder's late write is rejected.
#[tokio::test]
async fn test_stale_holder_cannot_write() {
    let store = Arc::new(InMemoryStore::new());
    let executor = ScriptedExecutor::new();
    let scheduler = scheduler(store.clone(), &executor);
    scheduler.schedule(sleep_job("backup", HOUR), false).await.unwrap();

    let (stale, record) = match store
        .try_acquire_lease(&JobId::new("backup"), Duration::from_millis(50))
        .await
        .unwrap()
    {
        LeaseAttempt::Acquired { lease, record } => (lease, record),
        LeaseAttempt::Busy => panic!("expected to acquire the lease"),
    };

    tokio::time::sleep(Duration::from_millis(80)).await;
    scheduler.run_pass(None, false).await.unwrap();

    assert!(store.update(&stale, &record).await.is_err());
    let current = store.get(&JobId::new("backup")).await.unwrap().unwrap();
    assert!(current.state.current_run.is_some());
}

/// Test: Run-now reports contention as busy rather than as a failure.
#[tokio::test]
async fn test_run_now_reports_busy() {
    let store = Arc::new(InMemoryStore::new());
    let executor = ScriptedExecutor::new();
    let scheduler = scheduler(store.clone(), &executor);
    scheduler.schedule(sleep_job("backup", HOUR), false).await.unwrap();

    let _held = store
        .try_acquire_lease(&JobId::new("backup"), Duration::from_secs(60))
        .await
        .unwrap();

    let result = scheduler.run_now(&JobId::new("backup")).await;
    assert!(matches!(result, Err(SchedulerError::JobBusy(_))));
    assert_eq!(scheduler.metrics().internal_errors(), 0);
}

/// Test: Rescheduling waits for a briefly held lease.
#[tokio::test]
async fn test_reschedule_waits_for_lease() {
    let store = Arc::new(InMemoryStore::new());
    let executor = ScriptedExecutor::new();
    let scheduler = scheduler(store.clone(), &executor);
    scheduler.schedule(sleep_job("backup", HOUR), false).await.unwrap();

    let _held = store
        .try_acquire_lease(&JobId::new("backup"), Duration::from_millis(150))
        .await
        .unwrap();

    scheduler
        .schedule(sleep_job("backup", 2 * HOUR), false)
        .await
        .unwrap();
    let record = store.get(&JobId::new("backup")).await.unwrap().unwrap();
    assert_eq!(record.spec.periodicity, 2 * HOUR);
}

/// Test: Rescheduling gives up on a lease held past the wait.
#[tokio::test]
async fn test_reschedule_gives_up_when_held() {
    let store = Arc::new(InMemoryStore::new());
    let executor = ScriptedExecutor::new();
    let scheduler = scheduler(store.clone(), &executor);
    scheduler.schedule(sleep_job("backup", HOUR), false).await.unwrap();

    let _held = store
        .try_acquire_lease(&JobId::new("backup"), Duration::from_secs(60))
        .await
        .unwrap();

    let result = scheduler.schedule(sleep_job("backup", 2 * HOUR), false).await;
    assert!(matches!(result, Err(SchedulerError::JobBusy(_))));
}
