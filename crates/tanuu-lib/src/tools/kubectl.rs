use crate::error::Result;
use crate::invoker::{CommandRunner, Invocation};
use crate::settings::{Settings, Timeouts};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::parse_id_list;

/// Aggregate `Ready` condition of every managed resource
const MANAGED_READY_JSONPATH: &str =
    r#"jsonpath={$.items[*].status.conditions[?(@.type=="Ready")].status}"#;

/// Bootstrap cluster CLI, always pointed at the control-plane kubeconfig
#[derive(Clone)]
pub struct KubeCtl {
    runner: Arc<dyn CommandRunner>,
    program: String,
    kubeconfig: PathBuf,
    timeouts: Timeouts,
}

impl KubeCtl {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: &Settings) -> Self {
        Self {
            runner,
            program: settings.kubectl_program.clone(),
            kubeconfig: settings.control_plane_kubeconfig_path(),
            timeouts: settings.timeouts.clone(),
        }
    }

    fn invocation(&self, timeout: Duration) -> Invocation {
        Invocation::new(&self.program, timeout)
            .env("KUBECONFIG", self.kubeconfig.display().to_string())
    }

    /// `kubectl apply -f <path>`
    pub async fn apply_file(&self, path: &Path) -> Result<()> {
        let invocation = self
            .invocation(self.timeouts.claim_apply)
            .args(["apply", "-f"])
            .arg(path.display().to_string());
        self.runner.run_checked(&invocation).await.map(|_| ())
    }

    /// Space-separated `True`/`False` values, one per managed resource.
    ///
    /// The call gets the probe timeout or `budget`, whichever is shorter.
    pub async fn managed_ready_status(&self, budget: Duration) -> Result<String> {
        let invocation = self
            .invocation(self.timeouts.probe.min(budget))
            .args(["get", "managed", "-o", MANAGED_READY_JSONPATH]);
        self.runner.run_checked(&invocation).await
    }

    /// Resource names (`kind.group/name`) of every node-group claim
    pub async fn list_node_group_claims(&self) -> Result<Vec<String>> {
        let invocation = self
            .invocation(self.timeouts.probe)
            .args(["get", "nodegroupclaims", "-o", "name", "--no-headers"]);
        let stdout = self.runner.run_checked(&invocation).await?;
        Ok(parse_id_list(&stdout))
    }

    /// `kubectl delete <resource>`
    pub async fn delete_resource(&self, resource: &str) -> Result<()> {
        let invocation = self
            .invocation(self.timeouts.delete_call)
            .args(["delete", resource]);
        self.runner.run_checked(&invocation).await.map(|_| ())
    }
}
