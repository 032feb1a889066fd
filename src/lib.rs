pub mod config;
pub mod core;
pub mod execution;
pub mod metrics;
pub mod scheduler;
pub mod storage;
pub mod testing;

pub use config::{ConfigError, CronConfig, SchedulerBuilder, StorageConfig, YamlLoader};
pub use core::clock::{Clock, SystemClock};
pub use core::flow::{CommandArgs, FlowKind, FlowSpec, FlowSpecError, SleepArgs};
pub use core::job::{JobRecord, JobSpec, JobSpecError, JobSummary, RunOutcome, RunStatus};
pub use core::types::{JobId, RunHandle};
pub use execution::{ExecutorError, FlowError, FlowExecutor, LocalFlowExecutor};
pub use metrics::CronMetrics;
pub use scheduler::{
    AlwaysLeader, CronWorker, JobPassOutcome, LeaderElection, LeadershipFlag, PassReport,
    PassStep, Scheduler, SchedulerError, SystemJob, TriggerOutcome, WorkerHandle, WorkerState,
};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStore;
pub use storage::{InMemoryStore, LeaseStore, StorageError};
