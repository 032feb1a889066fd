//! cronward - lease-coordinated periodic job scheduler.
//!
//! Usage:
//!   cw run               Run the scheduling loop until Ctrl+C
//!   cw validate          Validate the configuration without running
//!   cw list              List all jobs in the store
//!   cw status <job>      Show a job record with its run history
//!   cw trigger <job>     Run a job now and wait for it to finish
//!   cw metrics           Print metrics in Prometheus text format

use clap::{Parser, Subcommand};
use cronward::config::{CronConfig, SchedulerBuilder, YamlLoader};
use cronward::execution::{ContinuationStore, LocalFlowExecutor};
use cronward::scheduler::{PassStep, Scheduler, SchedulerError, TriggerOutcome};
use cronward::JobId;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How often `trigger` polls the run it started.
const TRIGGER_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Longest `trigger` waits for a job without a lifetime.
const TRIGGER_DEFAULT_WAIT: Duration = Duration::from_secs(300);

/// cw - lease-coordinated periodic job scheduler
#[derive(Parser)]
#[command(name = "cw")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file (defaults apply when omitted)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduling loop until interrupted
    Run,

    /// Validate the configuration without running
    Validate,

    /// List all jobs in the store
    List,

    /// Show a job record, including its run history
    Status {
        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },

    /// Enable a job
    Enable {
        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },

    /// Disable a job; a running flow is left alone
    Disable {
        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },

    /// Delete a job record
    Delete {
        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },

    /// Run a job now, regardless of schedule, and wait for it to finish.
    ///
    /// The run lives in this process. It is terminated if it outlasts the
    /// job's lifetime (or 5 minutes without one), and its result is recorded
    /// before the command exits.
    Trigger {
        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },

    /// Print the metric families in Prometheus text format
    Metrics,
}

/// Everything a command needs, wired from configuration.
struct Runtime {
    config: CronConfig,
    scheduler: Scheduler,
    executor: Arc<LocalFlowExecutor>,
}

impl Runtime {
    async fn open(config: CronConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let builder = SchedulerBuilder::new(&config);
        let store = builder.build_store().await?;

        let continuation = ContinuationStore::new(
            Arc::clone(&store),
            config.lease_duration,
            config.schedule_wait,
        );
        let executor = Arc::new(LocalFlowExecutor::new().with_continuation(continuation));
        let scheduler = builder.build_scheduler(store, executor.clone())?;

        Ok(Self {
            config,
            scheduler,
            executor,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Run => run_loop(Runtime::open(config).await?).await?,
        Commands::Validate => validate(&config),
        Commands::List => list_jobs(&Runtime::open(config).await?.scheduler).await?,
        Commands::Status { job_id } => {
            show_status(&Runtime::open(config).await?.scheduler, job_id).await?
        }
        Commands::Enable { job_id } => {
            let scheduler = Runtime::open(config).await?.scheduler;
            scheduler.enable(&JobId::new(job_id.as_str())).await?;
            println!("Enabled {}", job_id);
        }
        Commands::Disable { job_id } => {
            let scheduler = Runtime::open(config).await?.scheduler;
            scheduler.disable(&JobId::new(job_id.as_str())).await?;
            println!("Disabled {}", job_id);
        }
        Commands::Delete { job_id } => {
            let scheduler = Runtime::open(config).await?.scheduler;
            scheduler.delete(&JobId::new(job_id.as_str())).await?;
            println!("Deleted {}", job_id);
        }
        Commands::Trigger { job_id } => {
            trigger_job(&Runtime::open(config).await?.scheduler, job_id).await?
        }
        Commands::Metrics => {
            // Counters are per process; a long-running `cw run` is where they accumulate.
            print!("{}", Runtime::open(config).await?.scheduler.metrics().render());
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<CronConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(YamlLoader::load_config(path)?)
        }
        None => Ok(CronConfig::default()),
    }
}

/// Run the scheduling loop until Ctrl+C.
async fn run_loop(runtime: Runtime) -> Result<(), Box<dyn std::error::Error>> {
    if !runtime.config.active {
        warn!("Scheduling is disabled (active: false), not starting the loop");
        return Ok(());
    }

    let worker = SchedulerBuilder::new(&runtime.config).build_worker(runtime.scheduler.clone())?;

    info!(
        tick = ?runtime.config.tick_interval,
        system_jobs = runtime.config.system_jobs.len(),
        "Starting scheduling loop"
    );
    info!("Press Ctrl+C to stop");

    let (handle, worker_task) = worker.start().await;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            handle.shutdown().await?;
            let running = runtime.executor.active_runs();
            if running > 0 {
                warn!(running, "Abandoning runs still in progress");
            }
        }
        _ = worker_task => {
            info!("Scheduling loop stopped");
        }
    }

    Ok(())
}

/// Validate the configuration without running.
fn validate(config: &CronConfig) {
    info!("Configuration is valid");
    info!(
        "  tick {:?}, lease {:?}, {} job(s) per pass",
        config.tick_interval, config.lease_duration, config.pass_concurrency
    );
    for job in &config.system_jobs {
        let enabled = config.enabled_system_jobs.contains(&job.id);
        info!(
            "  - {} ({}){}",
            job.id,
            job.flow,
            if enabled { "" } else { " (disabled)" }
        );
    }
}

/// List all jobs in the store.
async fn list_jobs(scheduler: &Scheduler) -> Result<(), Box<dyn std::error::Error>> {
    let summaries = scheduler.list_summaries().await?;
    if summaries.is_empty() {
        println!("No jobs found");
        return Ok(());
    }

    println!(
        "{:<30} {:<10} {:<10} {:<9} {:<8} LAST START",
        "ID", "FLOW", "EVERY", "ENABLED", "STATUS"
    );
    for job in summaries {
        let status = if job.running {
            "running"
        } else {
            job.last_run_status.as_str()
        };
        let last_start = job
            .last_run_start
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<30} {:<10} {:<10} {:<9} {:<8} {}",
            job.id,
            job.flow,
            cronward::core::schedule::format_duration(job.periodicity),
            !job.disabled,
            status,
            last_start
        );
    }

    Ok(())
}

/// Print a job record as JSON.
async fn show_status(scheduler: &Scheduler, job_id: String) -> Result<(), Box<dyn std::error::Error>> {
    let record = scheduler.get_job(&JobId::new(job_id)).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// Force a run of one job and wait for it to finish.
///
/// The run executes inside this process. If it is still going once the wait
/// is over it is terminated, so the stored record never points at a run that
/// died with the process.
async fn trigger_job(scheduler: &Scheduler, job_id: String) -> Result<(), Box<dyn std::error::Error>> {
    let id = JobId::new(job_id.as_str());
    let record = scheduler.get_job(&id).await?;
    let wait = record.spec.lifetime.unwrap_or(TRIGGER_DEFAULT_WAIT);

    match scheduler.run_now_and_wait(&id, wait, TRIGGER_POLL_INTERVAL).await {
        Ok(TriggerOutcome::Finished { handle, status }) => {
            info!("Job '{}' finished with status {} (run: {})", job_id, status.as_str(), handle);
        }
        Ok(TriggerOutcome::Stopped { handle, status }) => {
            warn!(
                "Run {} still going after {:?}; terminated and recorded as {}",
                handle,
                wait,
                status.as_str()
            );
        }
        Ok(TriggerOutcome::NotStarted(PassStep::TimedOut)) => {
            warn!("Job '{}' had an overrunning run, which was terminated", job_id);
        }
        Ok(TriggerOutcome::NotStarted(_)) => {
            warn!("Job '{}' did not start a new run", job_id);
        }
        Err(SchedulerError::JobBusy(_)) => {
            error!("Job '{}' is being processed by another scheduler", job_id);
            return Err(format!("job '{}' is busy", job_id).into());
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
