//! Scheduler metrics.
//!
//! Each [`CronMetrics`] owns its own Prometheus [`Registry`], so several
//! schedulers (or tests) in one process never share counters.

use prometheus::{
    Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix.
const PREFIX: &str = "cron";

/// Counters and histograms maintained by the scheduler.
#[derive(Clone)]
pub struct CronMetrics {
    registry: Registry,
    internal_errors: Counter,
    job_failures: CounterVec,
    job_timeouts: CounterVec,
    job_latency: HistogramVec,
}

impl CronMetrics {
    /// Create the metrics and register them with a fresh registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let internal_errors = Counter::new(
            format!("{PREFIX}_internal_errors_total"),
            "Errors raised while processing a job in a scheduling pass",
        )?;

        let job_failures = CounterVec::new(
            Opts::new(
                format!("{PREFIX}_job_failures_total"),
                "Runs that completed with an error",
            ),
            &["job"],
        )?;

        let job_timeouts = CounterVec::new(
            Opts::new(
                format!("{PREFIX}_job_timeouts_total"),
                "Runs terminated for exceeding their lifetime",
            ),
            &["job"],
        )?;

        let job_latency = HistogramVec::new(
            HistogramOpts::new(
                format!("{PREFIX}_job_latency_seconds"),
                "Duration of finished runs in seconds",
            )
            .buckets(vec![
                1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 4.0 * 3600.0, 12.0 * 3600.0, 24.0 * 3600.0,
            ]),
            &["job"],
        )?;

        registry.register(Box::new(internal_errors.clone()))?;
        registry.register(Box::new(job_failures.clone()))?;
        registry.register(Box::new(job_timeouts.clone()))?;
        registry.register(Box::new(job_latency.clone()))?;

        Ok(Self {
            registry,
            internal_errors,
            job_failures,
            job_timeouts,
            job_latency,
        })
    }

    pub fn record_internal_error(&self) {
        self.internal_errors.inc();
    }

    pub fn record_failure(&self, job: &str) {
        self.job_failures.with_label_values(&[job]).inc();
    }

    pub fn record_timeout(&self, job: &str) {
        self.job_timeouts.with_label_values(&[job]).inc();
    }

    pub fn observe_latency(&self, job: &str, latency: Duration) {
        self.job_latency
            .with_label_values(&[job])
            .observe(latency.as_secs_f64());
    }

    pub fn internal_errors(&self) -> u64 {
        self.internal_errors.get() as u64
    }

    pub fn failures(&self, job: &str) -> u64 {
        self.job_failures.with_label_values(&[job]).get() as u64
    }

    pub fn timeouts(&self, job: &str) -> u64 {
        self.job_timeouts.with_label_values(&[job]).get() as u64
    }

    /// Number of latency observations recorded for a job.
    pub fn latency_samples(&self, job: &str) -> u64 {
        self.job_latency.with_label_values(&[job]).get_sample_count()
    }

    /// The underlying registry, for exporting alongside other metrics.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
