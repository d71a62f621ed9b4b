//! Observability infrastructure for environment lifecycle workflows
//!
//! Provides:
//! - Prometheus metrics (phase durations, external invocations, poll ticks, workflow results)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for workflow phases (in seconds); phases range from a
/// template render to a five minute readiness wait
const PHASE_BUCKETS: &[f64] = &[
    0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<Option<LifecycleMetricsInner>> = OnceLock::new();

struct LifecycleMetricsInner {
    phase_duration_seconds: HistogramVec,
    invocations_total: IntCounterVec,
    poll_ticks_total: IntCounterVec,
    workflows_total: IntCounterVec,
}

impl LifecycleMetricsInner {
    fn register() -> prometheus::Result<Self> {
        Ok(Self {
            phase_duration_seconds: register_histogram_vec!(
                "tanuu_phase_duration_seconds",
                "Time spent in each workflow phase",
                &["workflow", "phase"],
                PHASE_BUCKETS.to_vec()
            )?,

            invocations_total: register_int_counter_vec!(
                "tanuu_external_invocations_total",
                "External tool invocations by program and outcome",
                &["program", "outcome"]
            )?,

            poll_ticks_total: register_int_counter_vec!(
                "tanuu_poll_ticks_total",
                "Readiness probe ticks by probe and outcome",
                &["probe", "outcome"]
            )?,

            workflows_total: register_int_counter_vec!(
                "tanuu_workflows_total",
                "Completed workflows by kind and result",
                &["workflow", "result"]
            )?,
        })
    }
}

/// Lifecycle metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics. If registration
/// fails the handle records nothing.
#[derive(Clone)]
pub struct LifecycleMetrics {
    _private: (),
}

impl Default for LifecycleMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleMetrics {
    /// Create a new metrics handle (registers global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(|| match LifecycleMetricsInner::register() {
            Ok(inner) => Some(inner),
            Err(e) => {
                warn!(error = %e, "Failed to register lifecycle metrics");
                None
            }
        });
        Self { _private: () }
    }

    fn inner(&self) -> Option<&LifecycleMetricsInner> {
        GLOBAL_METRICS.get().and_then(Option::as_ref)
    }

    /// Record how long a workflow phase took
    pub fn observe_phase(&self, workflow: &str, phase: &str, elapsed: Duration) {
        if let Some(inner) = self.inner() {
            inner
                .phase_duration_seconds
                .with_label_values(&[workflow, phase])
                .observe(elapsed.as_secs_f64());
        }
    }

    /// Count one external invocation
    pub fn inc_invocation(&self, program: &str, outcome: &str) {
        if let Some(inner) = self.inner() {
            inner
                .invocations_total
                .with_label_values(&[program, outcome])
                .inc();
        }
    }

    /// Count one readiness probe tick
    pub fn inc_poll_tick(&self, probe: &str, outcome: &str) {
        if let Some(inner) = self.inner() {
            inner
                .poll_ticks_total
                .with_label_values(&[probe, outcome])
                .inc();
        }
    }

    /// Count a finished workflow
    pub fn inc_workflow(&self, workflow: &str, result: &str) {
        if let Some(inner) = self.inner() {
            inner
                .workflows_total
                .with_label_values(&[workflow, result])
                .inc();
        }
    }

    /// Render every registered metric in the text exposition format
    pub fn gather_text(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Structured logger for lifecycle events
///
/// Emits one `event = "..."` line per workflow milestone so log
/// processors can follow an environment from claim to teardown.
#[derive(Clone)]
pub struct StructuredLogger {
    environment: String,
}

impl StructuredLogger {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
        }
    }

    /// Log the start of a create workflow
    pub fn log_create_started(&self, gpu_requested: bool) {
        info!(
            event = "create_started",
            environment = %self.environment,
            gpu_requested = gpu_requested,
            "Creating environment"
        );
    }

    /// Log entry into a workflow phase
    pub fn log_phase(&self, workflow: &str, phase: &str) {
        info!(
            event = "phase_entered",
            environment = %self.environment,
            workflow = %workflow,
            phase = %phase,
            "Entering workflow phase"
        );
    }

    /// Log discovered node topology
    pub fn log_topology(&self, control_plane: usize, workers: usize, gpus: usize) {
        info!(
            event = "nodes_discovered",
            environment = %self.environment,
            control_plane = control_plane,
            workers = workers,
            gpus = gpus,
            "Discovered environment nodes"
        );
    }

    /// Log a readiness wait that expired
    pub fn log_readiness_timeout(&self, what: &str, waited: Duration, strict: bool) {
        warn!(
            event = "readiness_timed_out",
            environment = %self.environment,
            what = %what,
            waited_secs = waited.as_secs(),
            strict = strict,
            "Readiness wait expired"
        );
    }

    /// Log a finished create workflow
    pub fn log_created(&self, kubeconfig: &str, elapsed: Duration) {
        info!(
            event = "environment_created",
            environment = %self.environment,
            kubeconfig = %kubeconfig,
            elapsed_secs = elapsed.as_secs(),
            "Environment created"
        );
    }

    /// Log a finished delete workflow
    pub fn log_deleted(&self, machines: usize, claims: usize, failures: usize) {
        if failures == 0 {
            info!(
                event = "environment_deleted",
                environment = %self.environment,
                machines = machines,
                claims = claims,
                "Environment deleted"
            );
        } else {
            warn!(
                event = "partial_delete",
                environment = %self.environment,
                machines = machines,
                claims = claims,
                failures = failures,
                "Environment delete finished with failures"
            );
        }
    }
}
