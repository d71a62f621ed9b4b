//! Environment lifecycle orchestration
//!
//! Composes the invoker, inventory reader, poller and renderer into the
//! create and delete workflows. Steps run strictly in order; a failed
//! step stops the workflow without rolling back what was already applied.

mod artifacts;
mod builder;

#[cfg(test)]
mod tests;

pub use artifacts::ArtifactPaths;
pub use builder::OrchestratorBuilder;

use crate::error::{DeleteFailure, LifecycleError, Result};
use crate::inventory::NodeInventory;
use crate::invoker::CommandRunner;
use crate::models::Environment;
use crate::observability::{LifecycleMetrics, StructuredLogger};
use crate::poller::{PollOutcome, ReadinessPoller};
use crate::render::{ManifestRenderer, TemplateKind};
use crate::settings::Settings;
use crate::suffix::{unique_name, validate_name};
use crate::tools::{KubeCtl, OmniCtl};
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info};

/// Create workflow states, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatePhase {
    Initializing,
    RenderingClaim,
    ApplyingClaim,
    AwaitingNodeReadiness,
    DiscoveringNodes,
    RenderingCluster,
    ApplyingCluster,
    AwaitingClusterReadiness,
    RenderingKubeconfig,
    Cleanup,
    Created,
}

impl CreatePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreatePhase::Initializing => "initializing",
            CreatePhase::RenderingClaim => "rendering_claim",
            CreatePhase::ApplyingClaim => "applying_claim",
            CreatePhase::AwaitingNodeReadiness => "awaiting_node_readiness",
            CreatePhase::DiscoveringNodes => "discovering_nodes",
            CreatePhase::RenderingCluster => "rendering_cluster",
            CreatePhase::ApplyingCluster => "applying_cluster",
            CreatePhase::AwaitingClusterReadiness => "awaiting_cluster_readiness",
            CreatePhase::RenderingKubeconfig => "rendering_kubeconfig",
            CreatePhase::Cleanup => "cleanup",
            CreatePhase::Created => "created",
        }
    }

    /// Short human description for progress displays
    pub fn describe(&self) -> &'static str {
        match self {
            CreatePhase::Initializing => "Preparing environment",
            CreatePhase::RenderingClaim => "Rendering node claim",
            CreatePhase::ApplyingClaim => "Applying node claim",
            CreatePhase::AwaitingNodeReadiness => "Waiting for nodes",
            CreatePhase::DiscoveringNodes => "Discovering nodes",
            CreatePhase::RenderingCluster => "Rendering cluster template",
            CreatePhase::ApplyingCluster => "Syncing cluster template",
            CreatePhase::AwaitingClusterReadiness => "Waiting for cluster",
            CreatePhase::RenderingKubeconfig => "Writing kubeconfig",
            CreatePhase::Cleanup => "Cleaning up",
            CreatePhase::Created => "Environment created",
        }
    }
}

impl fmt::Display for CreatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delete workflow states, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePhase {
    DeletingCluster,
    DeletingMachineLinks,
    DeletingClaims,
    RemovingArtifacts,
    Deleted,
}

impl DeletePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletePhase::DeletingCluster => "deleting_cluster",
            DeletePhase::DeletingMachineLinks => "deleting_machine_links",
            DeletePhase::DeletingClaims => "deleting_claims",
            DeletePhase::RemovingArtifacts => "removing_artifacts",
            DeletePhase::Deleted => "deleted",
        }
    }
}

impl fmt::Display for DeletePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a completed create workflow
#[derive(Debug, Clone)]
pub struct CreateReport {
    /// Environment with its discovered node lists
    pub environment: Environment,
    /// Kubeconfig written for the new cluster
    pub kubeconfig: PathBuf,
    pub node_readiness: PollOutcome,
    pub cluster_readiness: PollOutcome,
    pub phase: CreatePhase,
    pub elapsed: Duration,
    pub completed_at: DateTime<Utc>,
}

/// Result of a delete workflow in which every step succeeded
#[derive(Debug, Clone)]
pub struct DeleteReport {
    pub environment: String,
    /// Machine ids whose links were deleted
    pub machine_links: Vec<String>,
    /// Node-group claim resources that were deleted
    pub claims: Vec<String>,
    /// Local files that existed and were removed
    pub removed_files: Vec<PathBuf>,
    pub phase: DeletePhase,
    pub completed_at: DateTime<Utc>,
}

/// Times workflow phases and reports transitions
struct PhaseTimer<'a> {
    workflow: &'static str,
    logger: &'a StructuredLogger,
    metrics: &'a LifecycleMetrics,
    current: Option<(&'static str, Instant)>,
}

impl<'a> PhaseTimer<'a> {
    fn new(
        workflow: &'static str,
        logger: &'a StructuredLogger,
        metrics: &'a LifecycleMetrics,
    ) -> Self {
        Self {
            workflow,
            logger,
            metrics,
            current: None,
        }
    }

    fn enter(&mut self, phase: &'static str) {
        self.finish();
        self.logger.log_phase(self.workflow, phase);
        self.current = Some((phase, Instant::now()));
    }

    fn finish(&mut self) {
        if let Some((phase, started)) = self.current.take() {
            self.metrics
                .observe_phase(self.workflow, phase, started.elapsed());
        }
    }
}

/// Drives create and delete workflows against the external tools
pub struct Orchestrator {
    settings: Settings,
    kubectl: KubeCtl,
    omnictl: OmniCtl,
    inventory: NodeInventory,
    poller: ReadinessPoller,
    renderer: Arc<dyn ManifestRenderer>,
    metrics: LifecycleMetrics,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub(crate) fn new(
        settings: Settings,
        runner: Arc<dyn CommandRunner>,
        renderer: Arc<dyn ManifestRenderer>,
    ) -> Self {
        let kubectl = KubeCtl::new(runner.clone(), &settings);
        let omnictl = OmniCtl::new(runner, &settings);
        let inventory = NodeInventory::new(
            omnictl.clone(),
            settings.discovery_concurrency,
            settings.role_match_scope,
            settings.ambiguity_policy,
        );
        let poller = ReadinessPoller::new(kubectl.clone(), omnictl.clone(), settings.poll.clone());

        Self {
            settings,
            kubectl,
            omnictl,
            inventory,
            poller,
            renderer,
            metrics: LifecycleMetrics::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Local files used by the environment called `name`
    pub fn artifact_paths(&self, name: &str) -> ArtifactPaths {
        ArtifactPaths::new(&self.settings.work_dir, name)
    }

    /// Names of the clusters known to the fleet manager
    pub async fn list_environments(&self) -> Result<Vec<String>> {
        self.omnictl.list_clusters().await
    }

    /// Create an environment named `<base>-<suffix>`
    pub async fn create(&self, base: &str, gpu_requested: bool) -> Result<CreateReport> {
        self.create_with_progress(base, gpu_requested, |_| {}).await
    }

    /// Like [`Orchestrator::create`], calling `on_phase` on every transition
    pub async fn create_with_progress<F>(
        &self,
        base: &str,
        gpu_requested: bool,
        on_phase: F,
    ) -> Result<CreateReport>
    where
        F: Fn(CreatePhase) + Send + Sync,
    {
        let name = unique_name(base, self.settings.suffix_length)?;
        let environment = Environment::new(name, gpu_requested, self.settings.credentials.clone());
        self.create_environment(environment, on_phase).await
    }

    /// Run the create workflow for an already named environment
    pub async fn create_environment<F>(
        &self,
        environment: Environment,
        on_phase: F,
    ) -> Result<CreateReport>
    where
        F: Fn(CreatePhase) + Send + Sync,
    {
        let name = environment.name.clone();
        let logger = StructuredLogger::new(&name);
        let result = self.run_create(environment, &logger, &on_phase).await;

        match &result {
            Ok(report) => {
                self.metrics.inc_workflow("create", "created");
                logger.log_created(&report.kubeconfig.display().to_string(), report.elapsed);
            }
            Err(e) => {
                self.metrics.inc_workflow("create", "failed");
                error!(environment = %name, error = %e, "Create workflow failed");
            }
        }

        result
    }

    async fn run_create<F>(
        &self,
        mut environment: Environment,
        logger: &StructuredLogger,
        on_phase: &F,
    ) -> Result<CreateReport>
    where
        F: Fn(CreatePhase) + Send + Sync,
    {
        let started = Instant::now();
        let mut timer = PhaseTimer::new("create", logger, &self.metrics);
        let mut enter = |phase: CreatePhase| {
            timer.enter(phase.as_str());
            on_phase(phase);
        };

        enter(CreatePhase::Initializing);
        validate_name(&environment.name)?;
        logger.log_create_started(environment.gpu_requested);
        let paths = self.artifact_paths(&environment.name);

        enter(CreatePhase::RenderingClaim);
        self.renderer
            .render_to(
                TemplateKind::claim(environment.gpu_requested),
                &environment,
                &paths.claim,
            )
            .await?;

        enter(CreatePhase::ApplyingClaim);
        self.check_control_plane_credentials().await?;
        self.kubectl.apply_file(&paths.claim).await?;

        enter(CreatePhase::AwaitingNodeReadiness);
        let node_readiness = self.poller.wait_for_nodes().await;
        self.accept_readiness("nodes", node_readiness, logger)?;
        self.propagation_delay().await;

        enter(CreatePhase::DiscoveringNodes);
        let topology = self.inventory.discover(&environment.name).await?;
        logger.log_topology(
            topology.control_plane.len(),
            topology.workers.len(),
            topology.gpus.len(),
        );
        environment.apply_topology(topology);

        enter(CreatePhase::RenderingCluster);
        self.renderer
            .render_to(TemplateKind::Cluster, &environment, &paths.cluster)
            .await?;

        enter(CreatePhase::ApplyingCluster);
        self.omnictl.sync_cluster_template(&paths.cluster).await?;

        enter(CreatePhase::AwaitingClusterReadiness);
        self.propagation_delay().await;
        let cluster_readiness = self
            .poller
            .wait_for_cluster(&environment.name, self.settings.cluster_poll_deadline())
            .await;
        self.accept_readiness("cluster", cluster_readiness, logger)?;

        enter(CreatePhase::RenderingKubeconfig);
        self.renderer
            .render_to(TemplateKind::Kubeconfig, &environment, &paths.kubeconfig)
            .await?;

        enter(CreatePhase::Cleanup);
        paths.remove_manifests().await?;

        enter(CreatePhase::Created);
        drop(enter);
        timer.finish();

        Ok(CreateReport {
            environment,
            kubeconfig: paths.kubeconfig,
            node_readiness,
            cluster_readiness,
            phase: CreatePhase::Created,
            elapsed: started.elapsed(),
            completed_at: Utc::now(),
        })
    }

    /// Tear down the environment called `name`.
    ///
    /// The cluster delete, machine discovery and claim listing stop the
    /// workflow on failure. Per-machine and per-claim deletes are all
    /// attempted; their failures are collected and returned together as
    /// [`LifecycleError::PartialDelete`] after the local files are removed.
    pub async fn delete(&self, name: &str) -> Result<DeleteReport> {
        let logger = StructuredLogger::new(name);
        let result = self.run_delete(name, &logger).await;

        let outcome = match &result {
            Ok(_) => "deleted",
            Err(LifecycleError::PartialDelete { .. }) => "partial",
            Err(_) => "failed",
        };
        self.metrics.inc_workflow("delete", outcome);

        result
    }

    async fn run_delete(&self, name: &str, logger: &StructuredLogger) -> Result<DeleteReport> {
        validate_name(name)?;
        let mut timer = PhaseTimer::new("delete", logger, &self.metrics);
        let mut failures = Vec::new();

        timer.enter(DeletePhase::DeletingCluster.as_str());
        self.omnictl.delete_cluster(name).await?;
        info!(environment = %name, "Cluster deleted");

        timer.enter(DeletePhase::DeletingMachineLinks.as_str());
        let machines = self.inventory.machines_for(name).await?;
        let mut machine_links = Vec::new();
        for machine in machines {
            match self.omnictl.delete_machine_link(&machine.id).await {
                Ok(()) => {
                    debug!(machine_id = %machine.id, "Machine link deleted");
                    machine_links.push(machine.id);
                }
                Err(e) => failures.push(DeleteFailure {
                    target: format!("machine link {}", machine.id),
                    error: e.to_string(),
                }),
            }
        }

        timer.enter(DeletePhase::DeletingClaims.as_str());
        let matching: Vec<String> = self
            .kubectl
            .list_node_group_claims()
            .await?
            .into_iter()
            .filter(|claim| claim.contains(name))
            .collect();
        let mut claims = Vec::new();
        for claim in matching {
            match self.kubectl.delete_resource(&claim).await {
                Ok(()) => {
                    debug!(claim = %claim, "Node group claim deleted");
                    claims.push(claim);
                }
                Err(e) => failures.push(DeleteFailure {
                    target: claim,
                    error: e.to_string(),
                }),
            }
        }

        timer.enter(DeletePhase::RemovingArtifacts.as_str());
        let paths = self.artifact_paths(name);
        let removed_files = match paths.remove_all().await {
            Ok(removed) => removed,
            Err(e) => {
                failures.push(DeleteFailure {
                    target: "local files".to_string(),
                    error: e.to_string(),
                });
                Vec::new()
            }
        };
        timer.finish();

        logger.log_deleted(machine_links.len(), claims.len(), failures.len());

        if !failures.is_empty() {
            return Err(LifecycleError::PartialDelete {
                environment: name.to_string(),
                failures,
            });
        }

        Ok(DeleteReport {
            environment: name.to_string(),
            machine_links,
            claims,
            removed_files,
            phase: DeletePhase::Deleted,
            completed_at: Utc::now(),
        })
    }

    async fn check_control_plane_credentials(&self) -> Result<()> {
        let path = self.settings.control_plane_kubeconfig_path();
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(LifecycleError::precondition(format!(
                "control-plane kubeconfig {} does not exist",
                path.display()
            ))),
            Err(e) => Err(LifecycleError::io(path, e)),
        }
    }

    fn accept_readiness(
        &self,
        what: &'static str,
        outcome: PollOutcome,
        logger: &StructuredLogger,
    ) -> Result<()> {
        if let PollOutcome::TimedOut { elapsed, .. } = outcome {
            logger.log_readiness_timeout(what, elapsed, self.settings.poll.strict);
            if self.settings.poll.strict {
                return Err(LifecycleError::ReadinessTimeout {
                    what,
                    waited: elapsed,
                });
            }
        }
        Ok(())
    }

    async fn propagation_delay(&self) {
        let delay = self.settings.propagation_delay;
        if !delay.is_zero() {
            debug!(delay_secs = delay.as_secs(), "Waiting for status propagation");
            sleep(delay).await;
        }
    }
}
