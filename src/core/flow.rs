//! Flow specifications and the closed set of flow kinds.
//!
//! A [`FlowSpec`] is what a job stores: a tag plus a JSON argument payload.
//! Resolving it yields a [`ResolvedFlow`] with typed arguments. Resolution is
//! a static mapping over [`FlowKind`], so an unknown tag or malformed
//! arguments are caught when a job is scheduled rather than when it runs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::schedule::{humane, humane_opt};

/// Errors raised while resolving a flow specification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlowSpecError {
    /// No flow kind is registered under this tag.
    #[error("unknown flow '{0}'")]
    UnknownFlow(String),

    /// The arguments do not match what the flow kind expects.
    #[error("invalid arguments for flow '{flow}': {reason}")]
    InvalidArgs { flow: String, reason: String },
}

/// The flow kinds this build knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    /// Run a local program.
    Command,
    /// Wait for a fixed duration. Used for diagnostics and smoke tests.
    Sleep,
}

impl FlowKind {
    /// Every known kind.
    pub const ALL: [FlowKind; 2] = [FlowKind::Command, FlowKind::Sleep];

    /// The tag used in job definitions.
    pub fn tag(&self) -> &'static str {
        match self {
            FlowKind::Command => "command",
            FlowKind::Sleep => "sleep",
        }
    }

    /// Look up a kind by its tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// The flow a job launches on every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSpec {
    /// Flow kind tag, e.g. `"command"`.
    pub flow: String,
    /// Kind-specific arguments.
    #[serde(default)]
    pub args: Value,
}

impl FlowSpec {
    /// Create a flow spec from a tag and an argument payload.
    pub fn new(flow: impl Into<String>, args: Value) -> Self {
        Self {
            flow: flow.into(),
            args,
        }
    }

    /// Flow spec for a local command.
    pub fn command(args: CommandArgs) -> Self {
        Self::new(
            FlowKind::Command.tag(),
            serde_json::to_value(args).unwrap_or(Value::Null),
        )
    }

    /// Flow spec for a sleep flow.
    pub fn sleep(args: SleepArgs) -> Self {
        Self::new(
            FlowKind::Sleep.tag(),
            serde_json::to_value(args).unwrap_or(Value::Null),
        )
    }

    /// Resolve the tag and parse the arguments.
    pub fn resolve(&self) -> Result<ResolvedFlow, FlowSpecError> {
        let kind = FlowKind::from_tag(&self.flow)
            .ok_or_else(|| FlowSpecError::UnknownFlow(self.flow.clone()))?;

        let invalid = |e: serde_json::Error| FlowSpecError::InvalidArgs {
            flow: self.flow.clone(),
            reason: e.to_string(),
        };

        match kind {
            FlowKind::Command => {
                let args: CommandArgs = serde_json::from_value(self.args.clone()).map_err(invalid)?;
                if args.program.trim().is_empty() {
                    return Err(FlowSpecError::InvalidArgs {
                        flow: self.flow.clone(),
                        reason: "program must not be empty".to_string(),
                    });
                }
                Ok(ResolvedFlow::Command(args))
            }
            FlowKind::Sleep => {
                let args: SleepArgs = serde_json::from_value(self.args.clone()).map_err(invalid)?;
                Ok(ResolvedFlow::Sleep(args))
            }
        }
    }
}

/// A flow spec with typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedFlow {
    Command(CommandArgs),
    Sleep(SleepArgs),
}

impl ResolvedFlow {
    /// The kind this flow belongs to.
    pub fn kind(&self) -> FlowKind {
        match self {
            ResolvedFlow::Command(_) => FlowKind::Command,
            ResolvedFlow::Sleep(_) => FlowKind::Sleep,
        }
    }
}

/// Arguments of the `command` flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandArgs {
    /// Program to execute.
    pub program: String,
    /// Command arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Kill the process after this long.
    #[serde(
        default,
        with = "humane_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
}

impl CommandArgs {
    /// Arguments for running `program` with no extra settings.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            timeout: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the process timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Arguments of the `sleep` flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SleepArgs {
    /// How long the run lasts.
    #[serde(with = "humane")]
    pub duration: Duration,
    /// Finish with an error instead of success.
    #[serde(default)]
    pub fail: bool,
    /// Count completed iterations in the job's continuation state.
    #[serde(default)]
    pub record_progress: bool,
}

impl SleepArgs {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            fail: false,
            record_progress: false,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn recording_progress(mut self) -> Self {
        self.record_progress = true;
        self
    }
}
