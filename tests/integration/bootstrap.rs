//! System job bootstrap integration tests.
//!
//! Tests that go from a YAML document to registered jobs, and that state in
//! a SQLite store survives a restart.

use cronward::config::{SchedulerBuilder, YamlLoader};
use cronward::scheduler::register_system_jobs;
use cronward::testing::ScriptedExecutor;
use cronward::{
    ConfigError, CronConfig, FlowSpec, JobId, JobSpec, RunOutcome, RunStatus, Scheduler, SleepArgs,
};
use std::sync::Arc;
use std::time::Duration;

fn config_for(db: &std::path::Path, enabled: &[&str]) -> CronConfig {
    let yaml = format!(
        r#"
tick_interval: 1h
storage:
  type: sqlite
  path: {}
enabled_system_jobs: [{}]
system_jobs:
  - id: disk_cleanup
    flow: command
    args:
      program: "true"
  - id: report_usage
    flow: sleep
    args: {{ duration: 10ms }}
    periodicity: 6h
    lifetime: unlimited
"#,
        db.display(),
        enabled.join(", ")
    );
    YamlLoader::parse_config(&yaml).unwrap()
}

async fn boot(config: &CronConfig, executor: &ScriptedExecutor) -> Scheduler {
    let builder = SchedulerBuilder::new(config);
    let store = builder.build_store().await.unwrap();
    let scheduler = builder
        .build_scheduler(store, Arc::new(executor.clone()))
        .unwrap();
    let report = register_system_jobs(&scheduler, &config.system_jobs().unwrap()).await;
    assert!(report.failed.is_empty());
    scheduler
}

/// Test: Configured system jobs are registered with defaults and enabled flags.
#[tokio::test]
async fn test_system_jobs_registered_from_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&dir.path().join("cron.db"), &["disk_cleanup"]);
    let executor = ScriptedExecutor::new();
    let scheduler = boot(&config, &executor).await;

    let cleanup = scheduler.get_job(&JobId::new("disk_cleanup")).await.unwrap();
    assert!(!cleanup.state.disabled);
    assert_eq!(cleanup.spec.periodicity, Duration::from_secs(86400));
    assert_eq!(cleanup.spec.lifetime, Some(Duration::from_secs(20 * 3600)));

    let usage = scheduler.get_job(&JobId::new("report_usage")).await.unwrap();
    assert!(usage.state.disabled);
    assert_eq!(usage.spec.lifetime, None);

    let report = scheduler.run_pass(None, false).await.unwrap();
    assert_eq!(report.started(), vec![&JobId::new("disk_cleanup")]);
}

/// Test: Run state persists across a restart and re-registration keeps it.
#[tokio::test]
async fn test_restart_keeps_run_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&dir.path().join("cron.db"), &["disk_cleanup"]);
    let executor = ScriptedExecutor::new();

    {
        let scheduler = boot(&config, &executor).await;
        scheduler.run_pass(None, false).await.unwrap();
        executor.complete_all(RunOutcome::CompletedOk);
        scheduler.run_pass(None, false).await.unwrap();
    }

    let scheduler = boot(&config, &executor).await;
    let cleanup = scheduler.get_job(&JobId::new("disk_cleanup")).await.unwrap();
    assert_eq!(cleanup.state.last_run_status, RunStatus::Ok);
    assert_eq!(cleanup.state.history.len(), 1);

    // Ran a moment ago; not due again.
    let report = scheduler.run_pass(None, false).await.unwrap();
    assert!(report.started().is_empty());
    assert_eq!(executor.start_count("disk_cleanup"), 1);
}

/// Test: Configuration overrides a manual enable on restart.
#[tokio::test]
async fn test_restart_reapplies_enabled_flags() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cron.db");
    let executor = ScriptedExecutor::new();

    let scheduler = boot(&config_for(&db, &[]), &executor).await;
    scheduler.enable(&JobId::new("report_usage")).await.unwrap();
    assert!(!scheduler.get_job(&JobId::new("report_usage")).await.unwrap().state.disabled);

    let scheduler = boot(&config_for(&db, &["disk_cleanup"]), &executor).await;
    assert!(scheduler.get_job(&JobId::new("report_usage")).await.unwrap().state.disabled);
    assert!(!scheduler.get_job(&JobId::new("disk_cleanup")).await.unwrap().state.disabled);
}

/// Test: Enabling an undefined system job fails validation.
#[test]
fn test_unknown_enabled_job_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!(
        "storage:\n  type: sqlite\n  path: {}\nenabled_system_jobs: [ghost]\n",
        dir.path().join("cron.db").display()
    );
    assert!(matches!(
        YamlLoader::parse_config(&yaml),
        Err(ConfigError::UnknownSystemJob(_))
    ));
}

/// Test: A sub-millisecond period is stored exactly and passes keep working.
#[tokio::test]
async fn test_sub_millisecond_period_survives_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let store = cronward::SqliteStore::new(dir.path().join("cron.db")).await.unwrap();
    let executor = ScriptedExecutor::new();
    let scheduler = Scheduler::new(Arc::new(store), Arc::new(executor.clone())).unwrap();

    let spec = JobSpec::new(
        "spin",
        FlowSpec::sleep(SleepArgs::new(Duration::from_micros(250))),
        Duration::from_micros(500),
    );
    scheduler.schedule(spec.clone(), false).await.unwrap();
    assert_eq!(scheduler.get_job(&JobId::new("spin")).await.unwrap().spec, spec);

    // Scheduling the same spec again matches what was stored.
    scheduler.schedule(spec.clone(), false).await.unwrap();
    assert_eq!(scheduler.get_job(&JobId::new("spin")).await.unwrap().spec, spec);

    let report = scheduler.run_pass(None, false).await.unwrap();
    assert!(report.failed().is_empty());
    assert_eq!(report.started(), vec![&JobId::new("spin")]);
}
