//! YAML configuration parsing.
//!
//! Parses the scheduler settings and the system job definitions from one
//! YAML document.
//!
//! ```yaml
//! tick_interval: 5m
//! lease_duration: 10m
//! storage:
//!   type: sqlite
//!   path: /var/lib/cronward/cron.db
//! enabled_system_jobs: [disk_cleanup]
//! system_jobs:
//!   - id: disk_cleanup
//!     flow: command
//!     args:
//!       program: /usr/local/bin/fleet-disk-cleanup
//!     periodicity: 1d
//!     lifetime: 20h
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use super::error::ConfigError;
use crate::core::flow::FlowSpec;
use crate::core::job::JobSpec;
use crate::core::schedule::{humane, parse_duration};
use crate::scheduler::{
    DEFAULT_HISTORY_LIMIT, DEFAULT_LEASE_DURATION, DEFAULT_PASS_CONCURRENCY,
    DEFAULT_SCHEDULE_WAIT, DEFAULT_TICK_INTERVAL, SystemJob,
};

/// Periodicity of a system job that does not set one.
pub const DEFAULT_SYSTEM_PERIODICITY: Duration = Duration::from_secs(86400);

/// Lifetime of a system job that does not set one.
pub const DEFAULT_SYSTEM_LIFETIME: Duration = Duration::from_secs(20 * 3600);

/// Top-level scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CronConfig {
    /// Time between scheduling ticks.
    #[serde(with = "humane")]
    pub tick_interval: Duration,
    /// Lease duration for job records.
    #[serde(with = "humane")]
    pub lease_duration: Duration,
    /// How long management writes wait for a busy lease.
    #[serde(with = "humane")]
    pub schedule_wait: Duration,
    /// Jobs processed concurrently in one pass.
    pub pass_concurrency: usize,
    /// Run history entries kept per job.
    pub history_limit: usize,
    /// Whether this process runs the scheduling loop at all.
    pub active: bool,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Names of system jobs that are enabled.
    pub enabled_system_jobs: Vec<String>,
    /// Built-in job definitions.
    pub system_jobs: Vec<SystemJobConfig>,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            lease_duration: DEFAULT_LEASE_DURATION,
            schedule_wait: DEFAULT_SCHEDULE_WAIT,
            pass_concurrency: DEFAULT_PASS_CONCURRENCY,
            history_limit: DEFAULT_HISTORY_LIMIT,
            active: true,
            storage: StorageConfig::default(),
            enabled_system_jobs: Vec::new(),
            system_jobs: Vec::new(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (default, non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// A system job definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemJobConfig {
    /// Job identifier.
    pub id: String,
    /// Flow kind tag.
    pub flow: String,
    /// Flow arguments.
    #[serde(default)]
    pub args: Value,
    /// Time between runs. Defaults to one day.
    pub periodicity: Option<String>,
    /// Maximum run time, or `unlimited`. Defaults to 20 hours.
    pub lifetime: Option<String>,
    /// Whether runs may overlap.
    #[serde(default)]
    pub allow_overruns: bool,
}

impl SystemJobConfig {
    /// Build the job spec this definition describes.
    pub fn to_spec(&self) -> Result<JobSpec, ConfigError> {
        let periodicity = match &self.periodicity {
            Some(raw) => parse_field(&self.id, "periodicity", raw)?,
            None => DEFAULT_SYSTEM_PERIODICITY,
        };

        let lifetime = match self.lifetime.as_deref() {
            Some("unlimited") => None,
            Some(raw) => Some(parse_field(&self.id, "lifetime", raw)?),
            None => Some(DEFAULT_SYSTEM_LIFETIME),
        };

        let mut spec = JobSpec::new(
            self.id.as_str(),
            FlowSpec::new(self.flow.as_str(), self.args.clone()),
            periodicity,
        )
        .with_allow_overruns(self.allow_overruns);
        spec.lifetime = lifetime;
        Ok(spec)
    }
}

fn parse_field(job: &str, field: &str, raw: &str) -> Result<Duration, ConfigError> {
    parse_duration(raw).map_err(|source| ConfigError::InvalidDuration {
        field: format!("system_jobs.{}.{}", job, field),
        source,
    })
}

impl CronConfig {
    /// System jobs with their enabled flag resolved.
    pub fn system_jobs(&self) -> Result<Vec<SystemJob>, ConfigError> {
        let enabled: HashSet<&str> = self.enabled_system_jobs.iter().map(String::as_str).collect();
        self.system_jobs
            .iter()
            .map(|job| {
                Ok(SystemJob {
                    spec: job.to_spec()?,
                    enabled: enabled.contains(job.id.as_str()),
                })
            })
            .collect()
    }
}

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load and validate a configuration file.
    pub fn load_config(path: impl AsRef<Path>) -> Result<CronConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_config(&content)
    }

    /// Parse and validate configuration from a string.
    pub fn parse_config(yaml: &str) -> Result<CronConfig, ConfigError> {
        // An empty document means all defaults.
        let config: CronConfig = if yaml.trim().is_empty() {
            CronConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Validate a parsed configuration.
    fn validate_config(config: &CronConfig) -> Result<(), ConfigError> {
        if config.tick_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "tick_interval must be greater than zero".to_string(),
            ));
        }
        if config.lease_duration.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "lease_duration must be greater than zero".to_string(),
            ));
        }
        if config.pass_concurrency == 0 {
            return Err(ConfigError::InvalidConfig(
                "pass_concurrency must be greater than zero".to_string(),
            ));
        }
        if let StorageConfig::Sqlite { path } = &config.storage {
            if path.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "storage.path must not be empty".to_string(),
                ));
            }
        }

        let mut seen = HashSet::new();
        for job in &config.system_jobs {
            if !seen.insert(job.id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate system job id: {}",
                    job.id
                )));
            }
            job.to_spec()?
                .validate()
                .map_err(|e| ConfigError::InvalidConfig(format!("system job '{}': {}", job.id, e)))?;
        }

        for name in &config.enabled_system_jobs {
            if !seen.contains(name.as_str()) {
                return Err(ConfigError::UnknownSystemJob(name.clone()));
            }
        }

        Ok(())
    }
}
