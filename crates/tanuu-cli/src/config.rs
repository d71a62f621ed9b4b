//! Configuration management for the CLI
//!
//! Layers, later ones winning: an optional `tanuu.toml`, the plain
//! process variables the tool has always read (`OMNI_ENDPOINT`,
//! `GITHUB_TOKEN`, ...), then `TANUU_*` overrides for every tunable.

use anyhow::{bail, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tanuu_lib::models::Credentials;
use tanuu_lib::suffix::validate_suffix_length;
use tanuu_lib::{AmbiguityPolicy, RoleMatchScope, Settings};

/// Unprefixed variables read from the process environment
const PLAIN_VARIABLES: &[&str] = &[
    "OMNI_ENDPOINT",
    "OMNI_SERVICE_ACCOUNT_KEY",
    "TAILSCALE_CLIENT_ID",
    "TAILSCALE_CLIENT_SECRET",
    "GITHUB_TOKEN",
    "LOG_LEVEL",
    "LOG_NAME",
];

/// Raw configuration as read from file and environment
#[derive(Debug, Deserialize)]
struct RawConfig {
    omni_endpoint: Option<String>,
    omni_service_account_key: Option<SecretString>,
    tailscale_client_id: Option<SecretString>,
    tailscale_client_secret: Option<SecretString>,
    github_token: Option<SecretString>,

    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_log_name")]
    log_name: String,

    work_dir: Option<PathBuf>,
    control_plane_kubeconfig: Option<PathBuf>,
    kubectl_program: Option<String>,
    omnictl_program: Option<String>,

    claim_apply_timeout_secs: Option<u64>,
    cluster_sync_timeout_secs: Option<u64>,
    delete_timeout_secs: Option<u64>,
    probe_timeout_secs: Option<u64>,

    poll_interval_secs: Option<u64>,
    node_deadline_secs: Option<u64>,
    cluster_deadline_secs: Option<u64>,
    strict_readiness: Option<bool>,
    propagation_delay_secs: Option<u64>,

    discovery_concurrency: Option<usize>,
    role_match_scope: Option<RoleMatchScope>,
    ambiguity_policy: Option<AmbiguityPolicy>,
    suffix_length: Option<usize>,
    kubernetes_version: Option<String>,
    talos_version: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_name() -> String {
    "app.log".to_string()
}

/// Where and how verbosely to log
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directive
    pub level: String,
    /// File name under `logs/`
    pub name: String,
}

/// Fully resolved CLI configuration
#[derive(Debug)]
pub struct CliConfig {
    pub settings: Settings,
    pub log: LogConfig,
}

impl CliConfig {
    /// Load configuration from `config_file` (if present) and the process environment
    pub fn load(config_file: &Path) -> Result<Self> {
        Self::load_from(config_file, std::env::vars().collect())
    }

    /// Load configuration from `config_file` and an explicit variable map
    pub fn load_from(config_file: &Path, vars: HashMap<String, String>) -> Result<Self> {
        let plain: HashMap<String, String> = vars
            .iter()
            .filter(|(key, _)| PLAIN_VARIABLES.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let raw: RawConfig = config::Config::builder()
            .add_source(config::File::from(config_file).required(false))
            .add_source(config::Environment::default().source(Some(plain)))
            .add_source(config::Environment::with_prefix("TANUU").source(Some(vars)))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        raw.into_config()
    }
}

impl RawConfig {
    fn into_config(self) -> Result<CliConfig> {
        let Some(endpoint) = self.omni_endpoint.filter(|e| !e.is_empty()) else {
            bail!("OMNI_ENDPOINT is not set");
        };
        let Some(service_account_key) = self
            .omni_service_account_key
            .filter(|k| !k.expose_secret().is_empty())
        else {
            bail!("OMNI_SERVICE_ACCOUNT_KEY is not set");
        };

        let mut settings = Settings::new(endpoint, service_account_key);
        let empty = || SecretString::new(String::new());
        settings.credentials = Credentials {
            tailscale_client_id: self.tailscale_client_id.unwrap_or_else(empty),
            tailscale_client_secret: self.tailscale_client_secret.unwrap_or_else(empty),
            github_token: self.github_token.unwrap_or_else(empty),
        };

        if let Some(dir) = self.work_dir {
            settings.work_dir = dir;
        }
        if let Some(path) = self.control_plane_kubeconfig {
            settings.control_plane_kubeconfig = path;
        }
        if let Some(program) = self.kubectl_program {
            settings.kubectl_program = program;
        }
        if let Some(program) = self.omnictl_program {
            settings.omnictl_program = program;
        }

        let secs = Duration::from_secs;
        let timeouts = &mut settings.timeouts;
        timeouts.claim_apply = self.claim_apply_timeout_secs.map_or(timeouts.claim_apply, secs);
        timeouts.cluster_sync = self.cluster_sync_timeout_secs.map_or(timeouts.cluster_sync, secs);
        timeouts.delete_call = self.delete_timeout_secs.map_or(timeouts.delete_call, secs);
        timeouts.probe = self.probe_timeout_secs.map_or(timeouts.probe, secs);

        let poll = &mut settings.poll;
        poll.interval = self.poll_interval_secs.map_or(poll.interval, secs);
        poll.node_deadline = self.node_deadline_secs.map_or(poll.node_deadline, secs);
        poll.cluster_deadline = self.cluster_deadline_secs.map_or(poll.cluster_deadline, secs);
        poll.strict = self.strict_readiness.unwrap_or(poll.strict);

        settings.propagation_delay = self
            .propagation_delay_secs
            .map_or(settings.propagation_delay, secs);
        settings.discovery_concurrency = self
            .discovery_concurrency
            .unwrap_or(settings.discovery_concurrency);
        settings.role_match_scope = self.role_match_scope.unwrap_or(settings.role_match_scope);
        settings.ambiguity_policy = self.ambiguity_policy.unwrap_or(settings.ambiguity_policy);
        if let Some(length) = self.suffix_length {
            validate_suffix_length(length).context("Invalid suffix_length")?;
            settings.suffix_length = length;
        }
        if let Some(version) = self.kubernetes_version {
            settings.kubernetes_version = version;
        }
        if let Some(version) = self.talos_version {
            settings.talos_version = version;
        }

        Ok(CliConfig {
            settings,
            log: LogConfig {
                level: self.log_level,
                name: self.log_name,
            },
        })
    }
}
