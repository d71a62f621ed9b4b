//! Environment teardown

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use tanuu_lib::{DeleteReport, LifecycleError, Orchestrator};

use crate::output::{print_error, print_summary, print_warning, OutputFormat};

/// Machine-readable delete result
#[derive(Serialize)]
struct DeleteSummary<'a> {
    environment: &'a str,
    machine_links: &'a [String],
    claims: &'a [String],
    removed_files: Vec<String>,
    completed_at: String,
}

/// Delete an environment and print the result
pub async fn delete_environment(
    orchestrator: &Orchestrator,
    name: &str,
    format: OutputFormat,
) -> Result<()> {
    match orchestrator.delete(name).await {
        Ok(report) => print_report(&report, format),
        Err(LifecycleError::PartialDelete {
            environment,
            failures,
        }) => {
            print_warning(&format!(
                "{} was deleted with {} failure(s):",
                environment,
                failures.len()
            ));
            for failure in &failures {
                println!("  {} {}: {}", "-".red(), failure.target, failure.error);
            }
            anyhow::bail!("Delete of '{}' was incomplete", environment)
        }
        Err(e) => {
            if e.is_not_found() {
                print_error(&format!("{} was not found; it may already be deleted", name));
            }
            Err(e).with_context(|| format!("Failed to delete environment '{}'", name))
        }
    }
}

fn print_report(report: &DeleteReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let summary = DeleteSummary {
                environment: &report.environment,
                machine_links: &report.machine_links,
                claims: &report.claims,
                removed_files: report
                    .removed_files
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect(),
                completed_at: report.completed_at.to_rfc3339(),
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Table => {
            print_summary(
                "Environment Deleted",
                &[
                    ("Name", report.environment.clone()),
                    ("Machine links", report.machine_links.len().to_string()),
                    ("Claims", report.claims.len().to_string()),
                    ("Local files removed", report.removed_files.len().to_string()),
                ],
            );
        }
    }

    Ok(())
}
