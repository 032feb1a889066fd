//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for the scheduler settings
//! and the system jobs it registers at start.

mod builder;
mod error;
mod yaml;

pub use builder::SchedulerBuilder;
pub use error::ConfigError;
pub use yaml::{
    CronConfig, DEFAULT_SYSTEM_LIFETIME, DEFAULT_SYSTEM_PERIODICITY, StorageConfig,
    SystemJobConfig, YamlLoader,
};
