//! Readiness polling
//!
//! Each tick is a fresh external query. A poll ends `Ready` on the first
//! positive observation or `TimedOut` once the next tick would fall at or
//! past the deadline. Probe errors count as "not ready yet". Each probe
//! is handed the time left, so a slow probe cannot carry the poll past
//! its deadline.

use crate::error::Result;
use crate::observability::LifecycleMetrics;
use crate::settings::PollSettings;
use crate::tools::{KubeCtl, OmniCtl};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Cadence for one poll
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub deadline: Duration,
}

/// Terminal state of a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready { ticks: u32, elapsed: Duration },
    TimedOut { ticks: u32, elapsed: Duration },
}

impl PollOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready { .. })
    }

    pub fn ticks(&self) -> u32 {
        match self {
            PollOutcome::Ready { ticks, .. } | PollOutcome::TimedOut { ticks, .. } => *ticks,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            PollOutcome::Ready { elapsed, .. } | PollOutcome::TimedOut { elapsed, .. } => *elapsed,
        }
    }
}

/// Run `probe` every `config.interval` until it reports ready or the
/// deadline passes. Never returns an error.
///
/// `probe` receives the time remaining before the deadline and must not
/// run longer than that.
pub async fn poll_until<F, Fut>(
    what: &'static str,
    config: PollConfig,
    metrics: &LifecycleMetrics,
    mut probe: F,
) -> PollOutcome
where
    F: FnMut(Duration) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = Instant::now();
    let mut ticks = 0u32;

    loop {
        ticks += 1;
        let remaining = config.deadline.saturating_sub(start.elapsed());

        match probe(remaining).await {
            Ok(true) => {
                metrics.inc_poll_tick(what, "ready");
                let elapsed = start.elapsed();
                debug!(probe = what, ticks, elapsed_secs = elapsed.as_secs(), "Ready");
                return PollOutcome::Ready { ticks, elapsed };
            }
            Ok(false) => {
                metrics.inc_poll_tick(what, "not_ready");
                debug!(probe = what, ticks, "Not ready yet");
            }
            Err(e) => {
                metrics.inc_poll_tick(what, "error");
                warn!(probe = what, ticks, error = %e, "Readiness probe failed");
            }
        }

        let elapsed = start.elapsed();
        if elapsed + config.interval >= config.deadline {
            warn!(
                probe = what,
                ticks,
                elapsed_secs = elapsed.as_secs(),
                "Gave up waiting for readiness"
            );
            return PollOutcome::TimedOut { ticks, elapsed };
        }

        sleep(config.interval).await;
    }
}

/// True when the aggregate `Ready` status contains no `False`
pub fn nodes_ready(status: &str) -> bool {
    !status.contains("False")
}

/// True when a status line reports the cluster running and not "Not Ready"
pub fn cluster_running(status: &str) -> bool {
    status
        .lines()
        .any(|line| line.contains("Cluster") && line.contains("RUNNING") && !line.contains("Not"))
}

/// Node and cluster readiness checks against the external tools
pub struct ReadinessPoller {
    kubectl: KubeCtl,
    omnictl: OmniCtl,
    settings: PollSettings,
    metrics: LifecycleMetrics,
}

impl ReadinessPoller {
    pub fn new(kubectl: KubeCtl, omnictl: OmniCtl, settings: PollSettings) -> Self {
        Self {
            kubectl,
            omnictl,
            settings,
            metrics: LifecycleMetrics::new(),
        }
    }

    /// Wait for every managed node resource to drop its `False` conditions
    pub async fn wait_for_nodes(&self) -> PollOutcome {
        let config = PollConfig {
            interval: self.settings.interval,
            deadline: self.settings.node_deadline,
        };
        let kubectl = &self.kubectl;

        poll_until("nodes", config, &self.metrics, move |budget| async move {
            kubectl
                .managed_ready_status(budget)
                .await
                .map(|status| nodes_ready(&status))
        })
        .await
    }

    /// Wait up to `deadline` for the named cluster to report RUNNING
    pub async fn wait_for_cluster(&self, name: &str, deadline: Duration) -> PollOutcome {
        let config = PollConfig {
            interval: self.settings.interval,
            deadline,
        };
        let omnictl = &self.omnictl;

        poll_until("cluster", config, &self.metrics, move |budget| async move {
            omnictl
                .cluster_status(name, budget)
                .await
                .map(|status| cluster_running(&status))
        })
        .await
    }
}
