//! Configuration error types.
//!
//! This module defines error types for configuration loading and validation.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::schedule::DurationError;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a specific file with context.
    #[error("failed to read file '{path}': {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// A duration setting could not be parsed.
    #[error("{field}: {source}")]
    InvalidDuration {
        field: String,
        #[source]
        source: DurationError,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// `enabled_system_jobs` names a job that is not defined.
    #[error("enabled system job '{0}' is not defined in system_jobs")]
    UnknownSystemJob(String),

    /// The configured store could not be opened.
    #[error("failed to open storage: {0}")]
    Storage(String),
}
