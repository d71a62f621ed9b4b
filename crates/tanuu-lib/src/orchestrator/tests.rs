//! Workflow tests for the lifecycle orchestrator
//!
//! These run whole create and delete workflows against a scripted
//! command runner and a scratch working directory, so no real
//! `kubectl` or `omnictl` is needed.

#[cfg(test)]
mod workflow_tests {
    use crate::error::LifecycleError;
    use crate::invoker::{Invocation, InvocationOutput};
    use crate::orchestrator::{CreatePhase, DeletePhase, Orchestrator};
    use crate::poller::PollOutcome;
    use crate::settings::Settings;
    use crate::testing::{machine_status_json, ScriptedRunner};
    use secrecy::SecretString;
    use serde::Deserialize;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_settings(work_dir: &Path) -> Settings {
        let mut settings = Settings::new(
            "https://acme.omni.siderolabs.io",
            SecretString::new("service-key".to_string()),
        );
        settings.work_dir = work_dir.to_path_buf();
        settings.propagation_delay = Duration::ZERO;
        settings.poll.interval = Duration::from_millis(10);
        settings.poll.node_deadline = Duration::from_millis(50);
        settings.poll.cluster_deadline = Duration::from_millis(50);
        settings
    }

    fn write_control_plane_kubeconfig(dir: &Path) {
        std::fs::write(dir.join("kubeconfig"), "apiVersion: v1\nkind: Config\n").unwrap();
    }

    fn orchestrator(settings: Settings, runner: Arc<ScriptedRunner>) -> Orchestrator {
        Orchestrator::builder()
            .settings(settings)
            .runner(runner)
            .build()
            .unwrap()
    }

    fn args(invocation: &Invocation) -> Vec<&str> {
        invocation.args.iter().map(String::as_str).collect()
    }

    /// Scripted control planes for a create run.
    ///
    /// The environment name is learned from the claim file passed to
    /// `kubectl apply`; the cluster manifest is captured when synced since
    /// the workflow deletes it afterwards.
    struct FakeFleet {
        environment: Mutex<Option<String>>,
        cluster_manifest: Mutex<Option<String>>,
        nodes_ready: &'static str,
        cluster_state: &'static str,
    }

    impl FakeFleet {
        fn new(nodes_ready: &'static str) -> Arc<Self> {
            Self::with_cluster_state(nodes_ready, "RUNNING Ready (3/3)")
        }

        fn with_cluster_state(nodes_ready: &'static str, cluster_state: &'static str) -> Arc<Self> {
            Arc::new(Self {
                environment: Mutex::new(None),
                cluster_manifest: Mutex::new(None),
                nodes_ready,
                cluster_state,
            })
        }

        fn environment(&self) -> String {
            self.environment.lock().unwrap().clone().unwrap_or_default()
        }

        fn respond(&self, invocation: &Invocation) -> InvocationOutput {
            let env = self.environment();
            match (invocation.program.as_str(), args(invocation).as_slice()) {
                ("kubectl", ["apply", "-f", path]) => {
                    let file = Path::new(path).file_name().unwrap().to_string_lossy();
                    let name = file.trim_end_matches("-composition.yaml").to_string();
                    assert!(Path::new(path).exists(), "claim must be rendered before apply");
                    *self.environment.lock().unwrap() = Some(name);
                    InvocationOutput::succeeded("nodegroupclaim.tanuu.dev/created\n")
                }
                ("kubectl", ["get", "managed", ..]) => InvocationOutput::succeeded(self.nodes_ready),
                ("omnictl", ["get", "machines", ..]) => {
                    InvocationOutput::succeeded("'m-cp'\n'm-w1'\n'm-w2'\n'm-other'\n")
                }
                ("omnictl", ["get", "machinestatus", id, ..]) => {
                    let hostname = match *id {
                        "m-cp" => format!("{}-ctlr-0", env),
                        "m-w1" => format!("{}-worker-0", env),
                        "m-w2" => format!("{}-worker-1", env),
                        _ => "other-env-worker-0".to_string(),
                    };
                    InvocationOutput::succeeded(machine_status_json(id, &hostname))
                }
                ("omnictl", ["cluster", "template", "sync", "-f", path]) => {
                    let manifest = std::fs::read_to_string(path).unwrap();
                    *self.cluster_manifest.lock().unwrap() = Some(manifest);
                    InvocationOutput::succeeded("")
                }
                ("omnictl", ["cluster", "status", name]) => InvocationOutput::succeeded(format!(
                    "Cluster \"{}\" {} (healthy/connected)\n",
                    name, self.cluster_state
                )),
                _ => InvocationOutput::failed(1, format!("unexpected command: {}", invocation)),
            }
        }
    }

    fn fleet_runner(fleet: &Arc<FakeFleet>) -> Arc<ScriptedRunner> {
        let fleet = fleet.clone();
        Arc::new(ScriptedRunner::new(move |invocation| fleet.respond(invocation)))
    }

    fn manifest_documents(manifest: &str) -> Vec<serde_yaml::Value> {
        serde_yaml::Deserializer::from_str(manifest)
            .map(|doc| serde_yaml::Value::deserialize(doc).unwrap())
            .filter(|doc| !doc.is_null())
            .collect()
    }

    fn machines_of<'a>(docs: &'a [serde_yaml::Value], kind: &str) -> Vec<Vec<&'a str>> {
        docs.iter()
            .filter(|doc| doc["kind"].as_str() == Some(kind))
            .map(|doc| {
                doc["machines"]
                    .as_sequence()
                    .map(|seq| seq.iter().filter_map(|m| m.as_str()).collect::<Vec<_>>())
                    .unwrap_or_default()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_create_end_to_end() {
        let dir = TempDir::new().unwrap();
        write_control_plane_kubeconfig(dir.path());
        let fleet = FakeFleet::new("True True");
        let runner = fleet_runner(&fleet);
        let orchestrator = orchestrator(test_settings(dir.path()), runner.clone());

        let phases = Mutex::new(Vec::new());
        let report = orchestrator
            .create_with_progress("demo", false, |phase| phases.lock().unwrap().push(phase))
            .await
            .unwrap();

        let name = report.environment.name.clone();
        assert!(name.starts_with("demo-"));
        assert_eq!(name.len(), "demo-".len() + 4);
        assert_eq!(fleet.environment(), name);

        assert_eq!(report.phase, CreatePhase::Created);
        assert_eq!(report.environment.control_plane, vec!["m-cp"]);
        assert_eq!(report.environment.workers, vec!["m-w1", "m-w2"]);
        assert!(report.environment.gpus.is_empty());
        assert!(report.node_readiness.is_ready());
        assert!(report.cluster_readiness.is_ready());

        let phases = phases.into_inner().unwrap();
        assert_eq!(phases.first(), Some(&CreatePhase::Initializing));
        assert_eq!(phases.last(), Some(&CreatePhase::Created));
        assert_eq!(phases.len(), 11);

        // Rendered cluster manifest: one control plane, two workers, no gpu group
        let manifest = fleet.cluster_manifest.lock().unwrap().clone().unwrap();
        let docs = manifest_documents(&manifest);
        assert_eq!(machines_of(&docs, "ControlPlane"), vec![vec!["m-cp"]]);
        assert_eq!(machines_of(&docs, "Workers"), vec![vec!["m-w1", "m-w2"]]);
        assert!(!manifest.contains("name: gpu"));

        // Manifests are cleaned up, the kubeconfig is the deliverable
        let paths = orchestrator.artifact_paths(&name);
        assert!(!paths.claim.exists());
        assert!(!paths.cluster.exists());
        assert_eq!(report.kubeconfig, paths.kubeconfig);
        let kubeconfig = std::fs::read_to_string(&paths.kubeconfig).unwrap();
        assert!(kubeconfig.contains(&format!("current-context: {}", name)));

        let lines = runner.command_lines();
        assert!(lines[0].starts_with("kubectl apply -f "));
        assert!(lines.iter().any(|l| l.starts_with("omnictl cluster template sync -f ")));
        assert!(lines.contains(&format!("omnictl cluster status {}", name)));

        let calls = runner.calls();
        let kubeconfig_env = dir.path().join("kubeconfig").display().to_string();
        assert!(calls
            .iter()
            .filter(|c| c.program == "kubectl")
            .all(|c| c.env.contains(&("KUBECONFIG".to_string(), kubeconfig_env.clone()))));
        assert!(calls.iter().filter(|c| c.program == "omnictl").all(|c| c
            .env
            .contains(&("OMNI_SERVICE_ACCOUNT_KEY".to_string(), "service-key".to_string()))));
    }

    #[tokio::test]
    async fn test_create_renders_gpu_claim() {
        let dir = TempDir::new().unwrap();
        write_control_plane_kubeconfig(dir.path());
        let claim = Arc::new(Mutex::new(String::new()));
        let captured = claim.clone();
        let runner = Arc::new(ScriptedRunner::new(move |invocation| {
            match (invocation.program.as_str(), args(invocation).as_slice()) {
                ("kubectl", ["apply", "-f", path]) => {
                    *captured.lock().unwrap() = std::fs::read_to_string(path).unwrap();
                    InvocationOutput::failed(1, "stop here")
                }
                _ => InvocationOutput::failed(1, "unexpected"),
            }
        }));

        let result = orchestrator(test_settings(dir.path()), runner)
            .create("lab", true)
            .await;

        assert!(matches!(result, Err(LifecycleError::CommandFailed { .. })));
        let claim = claim.lock().unwrap().clone();
        assert!(claim.contains("nodeRole: gpu"));
        assert!(claim.contains("nodeRole: worker"));
    }

    #[tokio::test]
    async fn test_create_requires_control_plane_kubeconfig() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|_| InvocationOutput::succeeded("")));

        let err = orchestrator(test_settings(dir.path()), runner.clone())
            .create("demo", false)
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::Precondition { .. }));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_name_before_any_call() {
        let dir = TempDir::new().unwrap();
        write_control_plane_kubeconfig(dir.path());
        let runner = Arc::new(ScriptedRunner::new(|_| InvocationOutput::succeeded("")));

        let err = orchestrator(test_settings(dir.path()), runner.clone())
            .create("Not_Valid", false)
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::Validation { .. }));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_stops_after_failed_apply() {
        let dir = TempDir::new().unwrap();
        write_control_plane_kubeconfig(dir.path());
        let runner = Arc::new(ScriptedRunner::new(|_| {
            InvocationOutput::failed(1, "error: unable to recognize \"demo-composition.yaml\"")
        }));

        let err = orchestrator(test_settings(dir.path()), runner.clone())
            .create("demo", false)
            .await
            .unwrap_err();

        match err {
            LifecycleError::CommandFailed { command, stderr, .. } => {
                assert!(command.starts_with("kubectl apply -f "));
                assert!(stderr.contains("unable to recognize"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_create_proceeds_past_node_readiness_timeout() {
        let dir = TempDir::new().unwrap();
        write_control_plane_kubeconfig(dir.path());
        let fleet = FakeFleet::new("True False");
        let orchestrator = orchestrator(test_settings(dir.path()), fleet_runner(&fleet));

        let report = orchestrator.create("demo", false).await.unwrap();

        assert!(matches!(report.node_readiness, PollOutcome::TimedOut { .. }));
        assert_eq!(report.phase, CreatePhase::Created);
    }

    #[tokio::test]
    async fn test_strict_readiness_aborts_on_timeout() {
        let dir = TempDir::new().unwrap();
        write_control_plane_kubeconfig(dir.path());
        let fleet = FakeFleet::new("True False");
        let runner = fleet_runner(&fleet);
        let mut settings = test_settings(dir.path());
        settings.poll.strict = true;

        let err = orchestrator(settings, runner.clone())
            .create("demo", false)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LifecycleError::ReadinessTimeout { what: "nodes", .. }
        ));
        assert!(!runner
            .command_lines()
            .iter()
            .any(|l| l.starts_with("omnictl get machines")));
    }

    #[tokio::test]
    async fn test_cluster_settle_delay_counts_against_cluster_deadline() {
        let dir = TempDir::new().unwrap();
        write_control_plane_kubeconfig(dir.path());
        let fleet = FakeFleet::with_cluster_state("True True", "SCALING_UP Not Ready (0/3)");
        let runner = fleet_runner(&fleet);
        let mut settings = test_settings(dir.path());
        settings.propagation_delay = Duration::from_millis(30);
        settings.poll.cluster_deadline = Duration::from_millis(50);

        let report = orchestrator(settings, runner.clone())
            .create("demo", false)
            .await
            .unwrap();

        // 20ms left for polling at a 10ms interval
        assert!(!report.cluster_readiness.is_ready());
        assert!(report.cluster_readiness.ticks() <= 2);
        let calls = runner.calls();
        let status_calls: Vec<_> = calls
            .iter()
            .filter(|call| args(call).starts_with(&["cluster", "status"]))
            .collect();
        assert_eq!(status_calls.len() as u32, report.cluster_readiness.ticks());
        assert!(status_calls
            .iter()
            .all(|call| call.timeout <= Duration::from_millis(20)));
    }

    /// A step of the delete workflow that cannot complete
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Outage {
        None,
        ClusterDeleteTimeout,
        MachineListing,
        ClaimListing,
    }

    /// Scripted control planes for delete runs
    struct FakeTeardown {
        cluster_deleted: Mutex<bool>,
        failing_links: Vec<&'static str>,
        failing_claims: Vec<&'static str>,
        outage: Outage,
    }

    impl FakeTeardown {
        fn new(failing_links: Vec<&'static str>, failing_claims: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                cluster_deleted: Mutex::new(false),
                failing_links,
                failing_claims,
                outage: Outage::None,
            })
        }

        fn with_outage(outage: Outage) -> Arc<Self> {
            Arc::new(Self {
                cluster_deleted: Mutex::new(false),
                failing_links: vec![],
                failing_claims: vec![],
                outage,
            })
        }

        fn respond(&self, invocation: &Invocation) -> InvocationOutput {
            match (invocation.program.as_str(), args(invocation).as_slice()) {
                ("omnictl", ["cluster", "delete", _]) if self.outage == Outage::ClusterDeleteTimeout => {
                    InvocationOutput::timed_out()
                }
                ("omnictl", ["get", "machines", ..]) if self.outage == Outage::MachineListing => {
                    InvocationOutput::failed(1, "rpc error: code = Unavailable desc = connection refused")
                }
                ("kubectl", ["get", "nodegroupclaims", ..]) if self.outage == Outage::ClaimListing => {
                    InvocationOutput::failed(1, "error: You must be logged in to the server (Unauthorized)")
                }
                ("omnictl", ["cluster", "delete", name]) => {
                    let mut deleted = self.cluster_deleted.lock().unwrap();
                    if *deleted {
                        InvocationOutput::failed(
                            1,
                            format!("rpc error: code = NotFound desc = cluster {} not found", name),
                        )
                    } else {
                        *deleted = true;
                        InvocationOutput::succeeded(format!("deleted cluster {}\n", name))
                    }
                }
                ("omnictl", ["get", "machines", ..]) => {
                    InvocationOutput::succeeded("'m-1'\n'm-2'\n'm-3'\n")
                }
                ("omnictl", ["get", "machinestatus", id, ..]) => {
                    let hostname = match *id {
                        "m-1" => "demo-ab12-worker-0",
                        "m-2" => "other-ctlr-0",
                        _ => "demo-ab12-ctlr-0",
                    };
                    InvocationOutput::succeeded(machine_status_json(id, hostname))
                }
                ("omnictl", ["delete", "link", id]) => {
                    if self.failing_links.contains(id) {
                        InvocationOutput::failed(1, "link is locked")
                    } else {
                        InvocationOutput::succeeded("")
                    }
                }
                ("kubectl", ["get", "nodegroupclaims", ..]) => InvocationOutput::succeeded(
                    "nodegroupclaim.tanuu.dev/demo-ab12-ctlr\n\
                     nodegroupclaim.tanuu.dev/demo-ab12-worker\n\
                     nodegroupclaim.tanuu.dev/other-ctlr\n",
                ),
                ("kubectl", ["delete", resource]) => {
                    if self.failing_claims.contains(resource) {
                        InvocationOutput::failed(1, "admission webhook denied the request")
                    } else {
                        InvocationOutput::succeeded("")
                    }
                }
                _ => InvocationOutput::failed(1, format!("unexpected command: {}", invocation)),
            }
        }
    }

    fn teardown_runner(fake: &Arc<FakeTeardown>) -> Arc<ScriptedRunner> {
        let fake = fake.clone();
        Arc::new(ScriptedRunner::new(move |invocation| fake.respond(invocation)))
    }

    fn write_artifacts(orchestrator: &Orchestrator, name: &str) -> Vec<PathBuf> {
        let paths = orchestrator.artifact_paths(name);
        let files = vec![paths.claim, paths.cluster, paths.kubeconfig];
        for file in &files {
            std::fs::write(file, "stale").unwrap();
        }
        files
    }

    #[tokio::test]
    async fn test_delete_removes_remote_resources_and_files() {
        let dir = TempDir::new().unwrap();
        let fake = FakeTeardown::new(vec![], vec![]);
        let runner = teardown_runner(&fake);
        let orchestrator = orchestrator(test_settings(dir.path()), runner.clone());
        let files = write_artifacts(&orchestrator, "demo-ab12");

        let report = orchestrator.delete("demo-ab12").await.unwrap();

        assert_eq!(report.phase, DeletePhase::Deleted);
        assert_eq!(report.machine_links, vec!["m-1", "m-3"]);
        assert_eq!(
            report.claims,
            vec![
                "nodegroupclaim.tanuu.dev/demo-ab12-ctlr",
                "nodegroupclaim.tanuu.dev/demo-ab12-worker"
            ]
        );
        assert_eq!(report.removed_files.len(), 3);
        assert!(files.iter().all(|f| !f.exists()));

        let lines = runner.command_lines();
        assert_eq!(lines[0], "omnictl cluster delete demo-ab12");
        assert!(!lines.contains(&"omnictl delete link m-2".to_string()));
        assert!(!lines.contains(&"kubectl delete nodegroupclaim.tanuu.dev/other-ctlr".to_string()));
    }

    #[tokio::test]
    async fn test_delete_twice_surfaces_not_found() {
        let dir = TempDir::new().unwrap();
        let fake = FakeTeardown::new(vec![], vec![]);
        let orchestrator = orchestrator(test_settings(dir.path()), teardown_runner(&fake));

        orchestrator.delete("demo-ab12").await.unwrap();
        let err = orchestrator.delete("demo-ab12").await.unwrap_err();

        assert!(matches!(err, LifecycleError::CommandFailed { .. }));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_stops_when_cluster_delete_times_out() {
        let dir = TempDir::new().unwrap();
        let fake = FakeTeardown::with_outage(Outage::ClusterDeleteTimeout);
        let runner = teardown_runner(&fake);
        let orchestrator = orchestrator(test_settings(dir.path()), runner.clone());
        let files = write_artifacts(&orchestrator, "demo-ab12");

        let err = orchestrator.delete("demo-ab12").await.unwrap_err();

        match err {
            LifecycleError::CommandTimeout { command, timeout } => {
                assert_eq!(command, "omnictl cluster delete demo-ab12");
                assert_eq!(timeout, Duration::from_secs(120));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runner.command_lines(), vec!["omnictl cluster delete demo-ab12"]);
        assert!(files.iter().all(|f| f.exists()));
    }

    #[tokio::test]
    async fn test_delete_stops_when_machine_discovery_fails() {
        let dir = TempDir::new().unwrap();
        let fake = FakeTeardown::with_outage(Outage::MachineListing);
        let runner = teardown_runner(&fake);
        let orchestrator = orchestrator(test_settings(dir.path()), runner.clone());
        let files = write_artifacts(&orchestrator, "demo-ab12");

        let err = orchestrator.delete("demo-ab12").await.unwrap_err();

        match err {
            LifecycleError::Discovery { stage, source } => {
                assert_eq!(stage, "listing machines");
                assert!(source.to_string().contains("connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let lines = runner.command_lines();
        assert_eq!(lines.len(), 2);
        assert!(!lines.iter().any(|l| l.starts_with("omnictl delete link")));
        assert!(!lines.iter().any(|l| l.starts_with("kubectl")));
        assert!(files.iter().all(|f| f.exists()));
    }

    #[tokio::test]
    async fn test_delete_stops_when_claim_listing_fails() {
        let dir = TempDir::new().unwrap();
        let fake = FakeTeardown::with_outage(Outage::ClaimListing);
        let runner = teardown_runner(&fake);
        let orchestrator = orchestrator(test_settings(dir.path()), runner.clone());
        let files = write_artifacts(&orchestrator, "demo-ab12");

        let err = orchestrator.delete("demo-ab12").await.unwrap_err();

        match err {
            LifecycleError::CommandFailed { command, stderr, .. } => {
                assert!(command.starts_with("kubectl get nodegroupclaims"));
                assert!(stderr.contains("Unauthorized"));
            }
            other => panic!("unexpected error: {other}"),
        }

        // Machine links were already handled; no claim is deleted
        let lines = runner.command_lines();
        assert!(lines.contains(&"omnictl delete link m-1".to_string()));
        assert!(lines.contains(&"omnictl delete link m-3".to_string()));
        assert!(!lines.iter().any(|l| l.starts_with("kubectl delete")));
        assert!(files.iter().all(|f| f.exists()));
    }

    #[tokio::test]
    async fn test_delete_collects_partial_failures() {
        let dir = TempDir::new().unwrap();
        let fake = FakeTeardown::new(
            vec!["m-1"],
            vec!["nodegroupclaim.tanuu.dev/demo-ab12-worker"],
        );
        let runner = teardown_runner(&fake);
        let orchestrator = orchestrator(test_settings(dir.path()), runner.clone());
        let files = write_artifacts(&orchestrator, "demo-ab12");

        let err = orchestrator.delete("demo-ab12").await.unwrap_err();

        match err {
            LifecycleError::PartialDelete {
                environment,
                failures,
            } => {
                assert_eq!(environment, "demo-ab12");
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].target, "machine link m-1");
                assert!(failures[0].error.contains("link is locked"));
                assert_eq!(failures[1].target, "nodegroupclaim.tanuu.dev/demo-ab12-worker");
            }
            other => panic!("unexpected error: {other}"),
        }

        // Every resource was still attempted and the files are gone
        let lines = runner.command_lines();
        assert!(lines.contains(&"omnictl delete link m-3".to_string()));
        assert!(lines.contains(&"kubectl delete nodegroupclaim.tanuu.dev/demo-ab12-ctlr".to_string()));
        assert!(files.iter().all(|f| !f.exists()));
    }

    #[tokio::test]
    async fn test_list_environments() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|invocation| {
            match args(invocation).as_slice() {
                ["get", "clusters", ..] => InvocationOutput::succeeded("'demo-ab12'\n'lab-09ff'\n"),
                _ => InvocationOutput::failed(1, "unexpected"),
            }
        }));

        let names = orchestrator(test_settings(dir.path()), runner)
            .list_environments()
            .await
            .unwrap();

        assert_eq!(names, vec!["demo-ab12", "lab-09ff"]);
    }
}
