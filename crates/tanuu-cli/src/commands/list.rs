//! Environment listing

use anyhow::{Context, Result};
use serde::Serialize;
use tabled::Tabled;
use tanuu_lib::Orchestrator;

use crate::output::{print_table, OutputFormat};

/// Row for the environments table
#[derive(Tabled, Serialize)]
struct EnvironmentRow {
    #[tabled(rename = "Environment")]
    name: String,
}

/// List the clusters known to the fleet manager
pub async fn list_environments(orchestrator: &Orchestrator, format: OutputFormat) -> Result<()> {
    let rows: Vec<EnvironmentRow> = orchestrator
        .list_environments()
        .await
        .context("Failed to list environments")?
        .into_iter()
        .map(|name| EnvironmentRow { name })
        .collect();

    print_table(&rows, format);
    Ok(())
}
