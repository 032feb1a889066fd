//! Worker handle for controlling the scheduling loop.
//!
//! This module provides the `WorkerHandle` type that allows external control
//! of the loop: run a tick immediately, inspect its state, shut it down.

use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};

use super::types::{PassReport, SchedulerError, WorkerCommand, WorkerState};

/// Buffer size for the command channel between WorkerHandle and CronWorker.
pub(crate) const COMMAND_CHANNEL_BUFFER: usize = 32;

/// Handle for controlling the scheduling loop.
#[derive(Clone)]
pub struct WorkerHandle {
    pub(crate) command_tx: mpsc::Sender<WorkerCommand>,
    pub(crate) state: Arc<RwLock<WorkerState>>,
}

impl WorkerHandle {
    /// Helper to send a command and wait for its response.
    async fn send_command<T>(
        &self,
        build_command: impl FnOnce(oneshot::Sender<T>) -> WorkerCommand,
        operation: &str,
    ) -> Result<T, SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(build_command(response_tx))
            .await
            .map_err(|_| {
                SchedulerError::ChannelError(format!("failed to send {} command", operation))
            })?;

        response_rx.await.map_err(|_| {
            SchedulerError::ChannelError(format!("failed to receive {} response", operation))
        })
    }

    /// Run a tick now instead of waiting for the interval.
    ///
    /// Returns `None` if this process is not the leader or the pass failed.
    pub async fn tick_now(&self) -> Result<Option<PassReport>, SchedulerError> {
        self.send_command(|response| WorkerCommand::Tick { response }, "tick")
            .await
    }

    /// Stop the loop. Runs already started keep going.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.send_command(|response| WorkerCommand::Shutdown { response }, "shutdown")
            .await
    }

    /// Get the current loop state.
    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Check if this process is currently leading.
    pub async fn is_leading(&self) -> bool {
        *self.state.read().await == WorkerState::Leading
    }
}
