use crate::error::{LifecycleError, Result};
use crate::invoker::{CommandRunner, Invocation};
use crate::models::Machine;
use crate::settings::{Settings, Timeouts};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::parse_id_list;

/// Fleet manager CLI
///
/// Every call carries `OMNI_ENDPOINT` and `OMNI_SERVICE_ACCOUNT_KEY` as an
/// environment overlay.
#[derive(Clone)]
pub struct OmniCtl {
    runner: Arc<dyn CommandRunner>,
    program: String,
    endpoint: String,
    service_account_key: SecretString,
    timeouts: Timeouts,
}

impl OmniCtl {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: &Settings) -> Self {
        Self {
            runner,
            program: settings.omnictl_program.clone(),
            endpoint: settings.omni.endpoint.clone(),
            service_account_key: settings.omni.service_account_key.clone(),
            timeouts: settings.timeouts.clone(),
        }
    }

    fn invocation(&self, timeout: Duration) -> Invocation {
        Invocation::new(&self.program, timeout)
            .env("OMNI_ENDPOINT", &self.endpoint)
            .env(
                "OMNI_SERVICE_ACCOUNT_KEY",
                self.service_account_key.expose_secret(),
            )
    }

    /// `omnictl cluster template sync -f <path>`
    pub async fn sync_cluster_template(&self, path: &Path) -> Result<()> {
        let invocation = self
            .invocation(self.timeouts.cluster_sync)
            .args(["cluster", "template", "sync", "-f"])
            .arg(path.display().to_string());
        self.runner.run_checked(&invocation).await.map(|_| ())
    }

    /// Ids of every machine known to the fleet manager
    pub async fn list_machine_ids(&self) -> Result<Vec<String>> {
        let invocation = self
            .invocation(self.timeouts.probe)
            .args(["get", "machines", "-o", "jsonpath={.metadata.id}"]);
        let stdout = self.runner.run_checked(&invocation).await?;
        Ok(parse_id_list(&stdout))
    }

    /// Fetch and parse the status of one machine
    pub async fn machine_status(&self, machine_id: &str) -> Result<Machine> {
        let invocation = self
            .invocation(self.timeouts.probe)
            .args(["get", "machinestatus", machine_id, "-o", "json"]);
        let stdout = self.runner.run_checked(&invocation).await?;
        parse_machine_status(machine_id, &stdout)
    }

    /// Human-readable status lines for a cluster, within `budget` at most
    pub async fn cluster_status(&self, name: &str, budget: Duration) -> Result<String> {
        let invocation = self
            .invocation(self.timeouts.probe.min(budget))
            .args(["cluster", "status", name]);
        self.runner.run_checked(&invocation).await
    }

    /// Names of every cluster known to the fleet manager
    pub async fn list_clusters(&self) -> Result<Vec<String>> {
        let invocation = self
            .invocation(self.timeouts.probe)
            .args(["get", "clusters", "-o", "jsonpath={.metadata.id}"]);
        let stdout = self.runner.run_checked(&invocation).await?;
        Ok(parse_id_list(&stdout))
    }

    pub async fn delete_cluster(&self, name: &str) -> Result<()> {
        let invocation = self
            .invocation(self.timeouts.delete_call)
            .args(["cluster", "delete", name]);
        self.runner.run_checked(&invocation).await.map(|_| ())
    }

    pub async fn delete_machine_link(&self, machine_id: &str) -> Result<()> {
        let invocation = self
            .invocation(self.timeouts.delete_call)
            .args(["delete", "link", machine_id]);
        self.runner.run_checked(&invocation).await.map(|_| ())
    }
}

#[derive(Debug, Default, Deserialize)]
struct MachineStatusDoc {
    #[serde(default)]
    metadata: StatusMetadata,
    #[serde(default)]
    spec: StatusSpec,
}

#[derive(Debug, Default, Deserialize)]
struct StatusMetadata {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct StatusSpec {
    #[serde(default)]
    connected: bool,
    #[serde(default)]
    platformmetadata: PlatformMetadata,
    #[serde(default)]
    network: NetworkStatus,
}

#[derive(Debug, Default, Deserialize)]
struct PlatformMetadata {
    #[serde(default)]
    hostname: String,
}

#[derive(Debug, Default, Deserialize)]
struct NetworkStatus {
    #[serde(default)]
    hostname: String,
}

/// Parse `omnictl get machinestatus <id> -o json`.
///
/// The platform hostname wins; the network hostname is used when the
/// platform does not report one.
pub(crate) fn parse_machine_status(machine_id: &str, json: &str) -> Result<Machine> {
    let doc: MachineStatusDoc =
        serde_json::from_str(json).map_err(|source| LifecycleError::MalformedMachineStatus {
            machine_id: machine_id.to_string(),
            source,
        })?;

    let id = if doc.metadata.id.is_empty() {
        machine_id.to_string()
    } else {
        doc.metadata.id
    };

    let hostname = if doc.spec.platformmetadata.hostname.is_empty() {
        doc.spec.network.hostname
    } else {
        doc.spec.platformmetadata.hostname
    };

    Ok(Machine {
        id,
        hostname,
        connected: doc.spec.connected,
    })
}
