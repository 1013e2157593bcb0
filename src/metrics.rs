//! Prometheus metrics for the API server and job supervisor

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,

    // HTTP
    pub http_requests_total: IntCounter,
    pub http_request_duration_seconds: Histogram,
    pub http_requests_in_flight: IntGauge,

    // Jobs
    pub jobs_started_total: IntCounter,
    pub jobs_active: IntGauge,
    pub jobs_completed_total: IntCounter,
    pub jobs_failed_total: IntCounter,
    pub jobs_stopped_total: IntCounter,
    pub job_duration_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounter::with_opts(Opts::new(
            "http_requests_total",
            "Total number of HTTP requests",
        ))?;
        let http_request_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
        ))?;
        let http_requests_in_flight = IntGauge::with_opts(Opts::new(
            "http_requests_in_flight",
            "Number of HTTP requests currently being served",
        ))?;

        let jobs_started_total = IntCounter::with_opts(Opts::new(
            "jobs_started_total",
            "Total number of external jobs launched",
        ))?;
        let jobs_active = IntGauge::with_opts(Opts::new(
            "jobs_active",
            "Number of jobs currently running",
        ))?;
        let jobs_completed_total = IntCounter::with_opts(Opts::new(
            "jobs_completed_total",
            "Total number of jobs that finished successfully",
        ))?;
        let jobs_failed_total = IntCounter::with_opts(Opts::new(
            "jobs_failed_total",
            "Total number of jobs that finished in failure",
        ))?;
        let jobs_stopped_total = IntCounter::with_opts(Opts::new(
            "jobs_stopped_total",
            "Total number of jobs stopped by request",
        ))?;
        let job_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("job_duration_seconds", "Job wall-clock duration in seconds")
                .buckets(vec![1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]),
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(http_requests_in_flight.clone()))?;
        registry.register(Box::new(jobs_started_total.clone()))?;
        registry.register(Box::new(jobs_active.clone()))?;
        registry.register(Box::new(jobs_completed_total.clone()))?;
        registry.register(Box::new(jobs_failed_total.clone()))?;
        registry.register(Box::new(jobs_stopped_total.clone()))?;
        registry.register(Box::new(job_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            http_requests_in_flight,
            jobs_started_total,
            jobs_active,
            jobs_completed_total,
            jobs_failed_total,
            jobs_stopped_total,
            job_duration_seconds,
        })
    }

    /// Export all metrics in Prometheus text format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Record a terminal transition on the job counters
    pub fn record_terminal(&self, status: crate::models::JobStatus) {
        use crate::models::JobStatus;
        match status {
            JobStatus::Completed => self.jobs_completed_total.inc(),
            JobStatus::Failed => self.jobs_failed_total.inc(),
            JobStatus::Stopped => self.jobs_stopped_total.inc(),
            JobStatus::Running => {}
        }
    }
}
