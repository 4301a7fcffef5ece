//! RAN Simulator CLI
//!
//! A command-line tool for inspecting a running simulation: status, alerts,
//! allocation plans and the drift timeline.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{alerts, allocations, drift, status};

/// RAN Simulator CLI
#[derive(Parser)]
#[command(name = "ransim")]
#[command(author, version, about = "CLI for the RAN drift simulator", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via RANSIM_API_URL env var)
    #[arg(long, env = "RANSIM_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the latest run status
    Status,

    /// Show component health
    Health,

    /// List drift alerts
    Alerts {
        /// Only show alerts of this severity (info, warning, critical)
        #[arg(long, short)]
        severity: Option<String>,
    },

    /// List recent allocation plans
    Allocations {
        /// Number of most recent plans to show
        #[arg(long, short, default_value_t = 10)]
        limit: usize,
    },

    /// Show drift detector state and timeline
    Drift {
        /// Number of most recent timeline points to show
        #[arg(long, default_value_t = 20)]
        last: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = client::ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Status => status::show_status(&client, cli.format).await?,
        Commands::Health => status::show_health(&client, cli.format).await?,
        Commands::Alerts { severity } => alerts::list_alerts(&client, severity, cli.format).await?,
        Commands::Allocations { limit } => {
            allocations::list_allocations(&client, limit, cli.format).await?
        }
        Commands::Drift { last } => drift::show_drift(&client, last, cli.format).await?,
    }

    Ok(())
}
