//! The scheduling loop.
//!
//! [`CronWorker`] registers system jobs once, then ticks at a fixed interval.
//! On every tick it asks the leadership oracle whether this process leads;
//! only the leader runs a scheduling pass. A failing or panicking pass is
//! logged and counted, and the loop carries on with the next tick. The loop
//! ends only through [`WorkerHandle::shutdown`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::bootstrap::{SystemJob, register_system_jobs};
use super::engine::Scheduler;
use super::handle::{COMMAND_CHANNEL_BUFFER, WorkerHandle};
use super::leader::{AlwaysLeader, LeaderElection};
use super::types::{PassReport, WorkerCommand, WorkerState};

/// Default time between ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(300);

/// Long-running driver of scheduling passes.
pub struct CronWorker {
    scheduler: Scheduler,
    leadership: Arc<dyn LeaderElection>,
    tick_interval: Duration,
    system_jobs: Vec<SystemJob>,
}

impl CronWorker {
    /// Create a worker that always considers itself the leader.
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            leadership: Arc::new(AlwaysLeader),
            tick_interval: DEFAULT_TICK_INTERVAL,
            system_jobs: Vec::new(),
        }
    }

    /// Set the leadership oracle.
    pub fn with_leadership(mut self, leadership: Arc<dyn LeaderElection>) -> Self {
        self.leadership = leadership;
        self
    }

    /// Set the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the system jobs registered at start.
    pub fn with_system_jobs(mut self, jobs: Vec<SystemJob>) -> Self {
        self.system_jobs = jobs;
        self
    }

    /// Register system jobs, then start the loop and return a handle for controlling it.
    pub async fn start(self) -> (WorkerHandle, JoinHandle<()>) {
        register_system_jobs(&self.scheduler, &self.system_jobs).await;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(WorkerState::Idle));

        let handle = WorkerHandle {
            command_tx,
            state: Arc::clone(&state),
        };

        let worker_task = tokio::spawn(async move {
            self.run(command_rx, state).await;
        });

        (handle, worker_task)
    }

    /// Main loop.
    async fn run(
        self,
        mut command_rx: mpsc::Receiver<WorkerCommand>,
        state: Arc<RwLock<WorkerState>>,
    ) {
        // First pass one interval after start; `tick_now` runs one sooner.
        let start = tokio::time::Instant::now() + self.tick_interval;
        let mut interval = tokio::time::interval_at(start, self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(tick = ?self.tick_interval, "Scheduling loop started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(&state).await;
                }

                Some(command) = command_rx.recv() => {
                    match command {
                        WorkerCommand::Tick { response } => {
                            let report = self.tick(&state).await;
                            let _ = response.send(report);
                        }
                        WorkerCommand::Shutdown { response } => {
                            *state.write().await = WorkerState::Stopped;
                            tracing::info!("Scheduling loop stopped");
                            let _ = response.send(());
                            break;
                        }
                    }
                }
            }
        }
    }

    /// One tick: check leadership, and run a pass if leading.
    async fn tick(&self, state: &RwLock<WorkerState>) -> Option<PassReport> {
        let leading = self.leadership.is_leader().await;
        {
            let mut current = state.write().await;
            match (*current, leading) {
                (WorkerState::Idle, true) => {
                    tracing::info!("Became leader, running scheduling passes");
                    *current = WorkerState::Leading;
                }
                (WorkerState::Leading, false) => {
                    tracing::info!("Lost leadership, going idle");
                    *current = WorkerState::Idle;
                }
                _ => {}
            }
        }

        if !leading {
            return None;
        }

        // Run the pass in its own task so a panic cannot take the loop down.
        let scheduler = self.scheduler.clone();
        let pass = tokio::spawn(async move { scheduler.run_pass(None, false).await });

        match pass.await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Scheduling pass failed");
                self.scheduler.metrics().record_internal_error();
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "Scheduling pass panicked");
                self.scheduler.metrics().record_internal_error();
                None
            }
        }
    }
}
