//! Registration of built-in system jobs.
//!
//! System jobs are declared in configuration and (re-)scheduled once when the
//! scheduling loop starts. Scheduling is idempotent, so restarting a process
//! with unchanged configuration leaves every record as it was. Jobs not
//! enabled by configuration are registered disabled, which also means the
//! configuration wins over a manual enable or disable on every restart.

use crate::core::job::JobSpec;
use crate::core::types::JobId;

use super::engine::Scheduler;

/// A built-in job and whether configuration enables it.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemJob {
    pub spec: JobSpec,
    pub enabled: bool,
}

/// Result of registering system jobs.
#[derive(Debug, Default)]
pub struct BootstrapReport {
    pub registered: Vec<JobId>,
    pub failed: Vec<(JobId, String)>,
}

/// Schedule every system job. Failures are logged and reported, not fatal.
pub async fn register_system_jobs(scheduler: &Scheduler, jobs: &[SystemJob]) -> BootstrapReport {
    let mut report = BootstrapReport::default();

    for job in jobs {
        let id = job.spec.id.clone();
        match scheduler.schedule(job.spec.clone(), !job.enabled).await {
            Ok(_) => {
                tracing::debug!(job_id = %id, enabled = job.enabled, "System job registered");
                report.registered.push(id);
            }
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Failed to register system job");
                report.failed.push((id, e.to_string()));
            }
        }
    }

    tracing::info!(
        registered = report.registered.len(),
        failed = report.failed.len(),
        "System jobs registered"
    );
    report
}
