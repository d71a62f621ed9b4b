//! Environment creation

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::time::Duration;
use tanuu_lib::{CreateReport, Orchestrator};

use crate::output::{
    color_readiness, format_elapsed, format_ids, print_success, print_summary, OutputFormat,
};

/// Machine-readable create result
#[derive(Serialize)]
struct CreateSummary<'a> {
    environment: &'a str,
    kubeconfig: String,
    control_plane: &'a [String],
    workers: &'a [String],
    gpus: &'a [String],
    nodes_ready: bool,
    cluster_ready: bool,
    elapsed_secs: u64,
    completed_at: String,
}

impl<'a> From<&'a CreateReport> for CreateSummary<'a> {
    fn from(report: &'a CreateReport) -> Self {
        Self {
            environment: &report.environment.name,
            kubeconfig: report.kubeconfig.display().to_string(),
            control_plane: &report.environment.control_plane,
            workers: &report.environment.workers,
            gpus: &report.environment.gpus,
            nodes_ready: report.node_readiness.is_ready(),
            cluster_ready: report.cluster_readiness.is_ready(),
            elapsed_secs: report.elapsed.as_secs(),
            completed_at: report.completed_at.to_rfc3339(),
        }
    }
}

/// Run the create workflow behind a spinner that follows its phases
pub async fn run_with_spinner(
    orchestrator: &Orchestrator,
    base_name: &str,
    gpu: bool,
) -> Result<CreateReport> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
            .context("Invalid progress template")?,
    );
    spinner.enable_steady_tick(Duration::from_millis(120));

    let progress = spinner.clone();
    let result = orchestrator
        .create_with_progress(base_name, gpu, move |phase| {
            progress.set_message(phase.describe());
        })
        .await;

    spinner.finish_and_clear();
    result.with_context(|| format!("Failed to create environment from '{}'", base_name))
}

/// Create an environment and print the result
pub async fn create_environment(
    orchestrator: &Orchestrator,
    base_name: &str,
    gpu: bool,
    format: OutputFormat,
) -> Result<()> {
    let report = run_with_spinner(orchestrator, base_name, gpu).await?;
    print_report(&report, format)
}

/// Print a create report
pub fn print_report(report: &CreateReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&CreateSummary::from(report))?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            let env = &report.environment;
            print_summary(
                "Environment Created",
                &[
                    ("Name", env.name.clone()),
                    ("Kubeconfig", report.kubeconfig.display().to_string()),
                    ("Control plane", format_ids(&env.control_plane)),
                    ("Workers", format_ids(&env.workers)),
                    ("GPU workers", format_ids(&env.gpus)),
                    ("Nodes", color_readiness(report.node_readiness.is_ready())),
                    ("Cluster", color_readiness(report.cluster_readiness.is_ready())),
                    ("Elapsed", format_elapsed(report.elapsed)),
                ],
            );
            print_success(&format!(
                "Use it with: export KUBECONFIG={}",
                report.kubeconfig.display()
            ));
        }
    }

    Ok(())
}
