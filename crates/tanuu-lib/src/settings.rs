//! Runtime settings for the lifecycle workflows
//!
//! Built once by the caller (the CLI loads it from file and environment)
//! and handed to the orchestrator. Nothing in the library reads process
//! environment variables on its own.

use crate::inventory::{AmbiguityPolicy, RoleMatchScope};
use crate::models::Credentials;
use crate::render::TemplateParams;
use crate::suffix::DEFAULT_SUFFIX_LENGTH;
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection values for the fleet manager
#[derive(Debug, Clone)]
pub struct OmniConnection {
    /// Fleet manager API endpoint URL
    pub endpoint: String,
    /// Service account key passed to every omnictl call
    pub service_account_key: SecretString,
}

/// Deadlines for individual external calls
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// Applying the node-group claim
    pub claim_apply: Duration,
    /// Syncing the cluster template
    pub cluster_sync: Duration,
    /// Each cluster, machine-link and claim delete call
    pub delete_call: Duration,
    /// Each readiness probe and listing call
    pub probe: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            claim_apply: Duration::from_secs(300),
            cluster_sync: Duration::from_secs(120),
            delete_call: Duration::from_secs(120),
            probe: Duration::from_secs(30),
        }
    }
}

/// Readiness polling cadence
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    /// Overall deadline for node readiness
    pub node_deadline: Duration,
    /// Overall deadline for cluster readiness, the settle delay before
    /// the first probe included
    pub cluster_deadline: Duration,
    /// Abort the workflow when a poll times out instead of proceeding
    pub strict: bool,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            node_deadline: Duration::from_secs(300),
            cluster_deadline: Duration::from_secs(120),
            strict: false,
        }
    }
}

/// Everything the orchestrator needs to run a workflow
#[derive(Debug, Clone)]
pub struct Settings {
    pub omni: OmniConnection,
    pub credentials: Credentials,
    /// Directory holding the transient manifests and the kubeconfig
    pub work_dir: PathBuf,
    /// Control-plane credential file that must exist before applying claims
    pub control_plane_kubeconfig: PathBuf,
    pub kubectl_program: String,
    pub omnictl_program: String,
    pub timeouts: Timeouts,
    pub poll: PollSettings,
    /// Settle delay between a readiness signal and the next read
    pub propagation_delay: Duration,
    /// Maximum concurrent machine status calls during discovery
    pub discovery_concurrency: usize,
    pub role_match_scope: RoleMatchScope,
    pub ambiguity_policy: AmbiguityPolicy,
    /// Number of hex characters appended to a base name
    pub suffix_length: usize,
    pub kubernetes_version: String,
    pub talos_version: String,
}

impl Settings {
    /// Settings with default tunables for the given fleet manager
    pub fn new(endpoint: impl Into<String>, service_account_key: SecretString) -> Self {
        Self {
            omni: OmniConnection {
                endpoint: endpoint.into(),
                service_account_key,
            },
            credentials: Credentials::default(),
            work_dir: PathBuf::from("."),
            control_plane_kubeconfig: PathBuf::from("kubeconfig"),
            kubectl_program: "kubectl".to_string(),
            omnictl_program: "omnictl".to_string(),
            timeouts: Timeouts::default(),
            poll: PollSettings::default(),
            propagation_delay: Duration::from_secs(30),
            discovery_concurrency: 4,
            role_match_scope: RoleMatchScope::default(),
            ambiguity_policy: AmbiguityPolicy::default(),
            suffix_length: DEFAULT_SUFFIX_LENGTH,
            kubernetes_version: "v1.30.1".to_string(),
            talos_version: "v1.7.4".to_string(),
        }
    }

    /// Control-plane kubeconfig resolved against the working directory
    pub fn control_plane_kubeconfig_path(&self) -> PathBuf {
        resolve(&self.work_dir, &self.control_plane_kubeconfig)
    }

    /// Time left for cluster polling once the settle delay has run
    pub fn cluster_poll_deadline(&self) -> Duration {
        self.poll
            .cluster_deadline
            .saturating_sub(self.propagation_delay)
    }

    pub fn template_params(&self) -> TemplateParams {
        TemplateParams {
            kubernetes_version: self.kubernetes_version.clone(),
            talos_version: self.talos_version.clone(),
            omni_endpoint: self.omni.endpoint.clone(),
        }
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
