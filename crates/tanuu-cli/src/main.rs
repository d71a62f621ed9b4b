//! Tanuu CLI
//!
//! Provisions and tears down ephemeral Kubernetes environments on
//! Omni-managed machines, either from flags or from an interactive menu.

mod commands;
mod config;
mod menu;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{create, delete, list};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tanuu_lib::suffix::validate_name;
use tanuu_lib::{LifecycleMetrics, Orchestrator};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Tanuu CLI
#[derive(Parser)]
#[command(name = "tanuu")]
#[command(author, version, about = "Create and delete ephemeral Omni clusters", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Write Prometheus metrics in text format to this file when done
    #[arg(long, global = true)]
    pub metrics_file: Option<PathBuf>,

    /// Optional configuration file
    #[arg(long, global = true, env = "TANUU_CONFIG", default_value = "tanuu.toml")]
    pub config: PathBuf,

    /// Runs the interactive menu when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an environment named <NAME>-<suffix>
    Create {
        /// Base name: lowercase letters, digits and dashes
        #[arg(long, short)]
        name: String,

        /// Add a GPU node group
        #[arg(long, short)]
        gpu: bool,
    },

    /// Delete an environment by its full name
    Delete {
        /// Full environment name, including the suffix
        #[arg(long, short)]
        name: String,
    },

    /// List environments known to the fleet manager
    List,
}

/// Send logs to `logs/<name>` so they stay out of the interactive menu
fn init_tracing(log: &config::LogConfig) -> Result<()> {
    let dir = Path::new("logs");
    std::fs::create_dir_all(dir).context("Failed to create log directory")?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(&log.name))
        .with_context(|| format!("Failed to open log file {}", log.name))?;

    let filter = EnvFilter::try_new(&log.level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_ansi(false).with_writer(Mutex::new(file)))
        .init();

    Ok(())
}

fn write_metrics(path: &Path) -> Result<()> {
    let text = LifecycleMetrics::new()
        .gather_text()
        .context("Failed to encode metrics")?;
    std::fs::write(path, text)
        .with_context(|| format!("Failed to write metrics to {}", path.display()))
}

async fn dispatch(cli: &Cli, orchestrator: &Orchestrator) -> Result<()> {
    match &cli.command {
        Some(Commands::Create { name, gpu }) => {
            create::create_environment(orchestrator, name, *gpu, cli.format).await
        }
        Some(Commands::Delete { name }) => {
            delete::delete_environment(orchestrator, name, cli.format).await
        }
        Some(Commands::List) => list::list_environments(orchestrator, cli.format).await,
        None => menu::InteractiveMenu::new(orchestrator).run().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Reject a bad base name before touching configuration or the fleet
    if let Some(Commands::Create { name, .. }) = &cli.command {
        validate_name(name).context("Invalid environment name")?;
    }

    let loaded = config::CliConfig::load(&cli.config)?;
    init_tracing(&loaded.log)?;
    info!(
        endpoint = %loaded.settings.omni.endpoint,
        work_dir = %loaded.settings.work_dir.display(),
        "Tanuu configured"
    );

    let orchestrator = Orchestrator::builder()
        .settings(loaded.settings)
        .build()
        .context("Failed to initialize orchestrator")?;

    let result = dispatch(&cli, &orchestrator).await;

    if let Some(path) = &cli.metrics_file {
        if let Err(e) = write_metrics(path) {
            output::print_warning(&format!("{:#}", e));
        }
    }

    result
}
