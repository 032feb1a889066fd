//! Runtime wiring from configuration.
//!
//! Turns a [`CronConfig`] into a store, a scheduler and a worker.

use std::sync::Arc;

use super::error::ConfigError;
use super::yaml::{CronConfig, StorageConfig};
use crate::execution::FlowExecutor;
use crate::scheduler::{CronWorker, Scheduler};
use crate::storage::{InMemoryStore, LeaseStore};

/// Builds runtime components from a configuration.
pub struct SchedulerBuilder<'a> {
    config: &'a CronConfig,
}

impl<'a> SchedulerBuilder<'a> {
    pub fn new(config: &'a CronConfig) -> Self {
        Self { config }
    }

    /// Open the configured lease store.
    pub async fn build_store(&self) -> Result<Arc<dyn LeaseStore>, ConfigError> {
        match &self.config.storage {
            StorageConfig::Memory => Ok(Arc::new(InMemoryStore::new())),
            #[cfg(feature = "sqlite")]
            StorageConfig::Sqlite { path } => {
                let store = crate::storage::SqliteStore::new(path)
                    .await
                    .map_err(|e| ConfigError::Storage(e.to_string()))?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "sqlite"))]
            StorageConfig::Sqlite { .. } => Err(ConfigError::Storage(
                "sqlite storage requires the 'sqlite' feature".to_string(),
            )),
        }
    }

    /// Create a scheduler over the given store and executor with the
    /// configured settings.
    pub fn build_scheduler(
        &self,
        store: Arc<dyn LeaseStore>,
        executor: Arc<dyn FlowExecutor>,
    ) -> Result<Scheduler, ConfigError> {
        let scheduler = Scheduler::new(store, executor)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?
            .with_lease_duration(self.config.lease_duration)
            .with_schedule_wait(self.config.schedule_wait)
            .with_pass_concurrency(self.config.pass_concurrency)
            .with_history_limit(self.config.history_limit);
        Ok(scheduler)
    }

    /// Create the scheduling loop, with system jobs attached.
    pub fn build_worker(&self, scheduler: Scheduler) -> Result<CronWorker, ConfigError> {
        Ok(CronWorker::new(scheduler)
            .with_tick_interval(self.config.tick_interval)
            .with_system_jobs(self.config.system_jobs()?))
    }
}
