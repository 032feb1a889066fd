//! Cron scheduling: the scheduler facade and the loop that drives it.
//!
//! [`Scheduler`] holds the management operations and the run pass.
//! [`CronWorker`] ticks the scheduler while this process leads, after
//! registering system jobs once.

mod bootstrap;
mod engine;
mod handle;
mod leader;
mod types;
mod worker;

pub use bootstrap::{BootstrapReport, SystemJob, register_system_jobs};
pub use engine::{
    DEFAULT_HISTORY_LIMIT, DEFAULT_LEASE_DURATION, DEFAULT_PASS_CONCURRENCY,
    DEFAULT_SCHEDULE_WAIT, Scheduler,
};
pub use handle::WorkerHandle;
pub use leader::{AlwaysLeader, LeaderElection, LeadershipFlag};
pub use types::{
    JobPassOutcome, PassReport, PassStep, SchedulerError, TriggerOutcome, WorkerState,
};
pub use worker::{CronWorker, DEFAULT_TICK_INTERVAL};
