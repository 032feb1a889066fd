//! The `command` flow: run a local program to completion.
//!
//! Exit status 0 ends the run successfully; anything else fails it. The child
//! is killed if the run is terminated, since the future owning it is dropped.
//!
//! ```yaml
//! flow:
//!   flow: command
//!   args:
//!     program: find
//!     args: ["/var/tmp/fleet", "-mtime", "+7", "-delete"]
//!     env: { LC_ALL: C }
//!     timeout: 2h
//! ```

use std::process::Stdio;
use tokio::process::Command;
use tokio::time::timeout;

use super::FlowError;
use crate::core::flow::CommandArgs;

/// Run the program described by `args` and wait for it.
pub async fn run_command(args: &CommandArgs) -> Result<(), FlowError> {
    let mut cmd = Command::new(&args.program);
    cmd.args(&args.args);

    for (key, value) in &args.env {
        cmd.env(key, value);
    }

    if let Some(ref dir) = args.working_dir {
        cmd.current_dir(dir);
    }

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let output = match args.timeout {
        Some(duration) => timeout(duration, cmd.output())
            .await
            .map_err(|_| FlowError::Timeout(duration))?
            .map_err(|e| FlowError::ExecutionFailed(e.to_string()))?,
        None => cmd
            .output()
            .await
            .map_err(|e| FlowError::ExecutionFailed(e.to_string()))?,
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    tracing::debug!(
        program = %args.program,
        stdout = %stdout.trim_end(),
        stderr = %stderr.trim_end(),
        "Command finished"
    );

    if output.status.success() {
        Ok(())
    } else {
        Err(FlowError::CommandFailed {
            code: output.status.code().unwrap_or(-1),
            stderr: stderr.trim_end().to_string(),
        })
    }
}
