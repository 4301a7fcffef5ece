//! Run status and health commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_status, format_timestamp, print_header, print_info, print_json, print_table,
    OutputFormat,
};

/// Row for component health table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Show the latest run status
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status = client.status().await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            print_header("Simulation Status", 50);
            println!("Run:                    {}", status.run_id.cyan());
            println!("Tick:                   {}", status.tick);
            println!("Cells:                  {}", status.cells);
            println!(
                "Drift:                  {}",
                color_status(&status.drift_status)
            );

            let model = if status.fallback {
                format!("{} {}", status.model_version, "(fallback)".yellow())
            } else {
                status.model_version.clone()
            };
            println!("Model:                  {}", model);
            println!("Events seen:            {}", status.events_seen);
            println!("Alerts raised:          {}", status.alerts_raised);

            if let Some(alert) = &status.last_alert {
                println!();
                println!("{}", "Last Alert".bold());
                println!("{}", "-".repeat(50));
                println!(
                    "[{}] {} at tick {}",
                    color_status(&alert.severity),
                    alert.kind,
                    alert.tick
                );
                println!("{}", alert.message.dimmed());
            } else if status.tick == 0 {
                print_info("No ticks processed yet");
            }
        }
    }

    Ok(())
}

/// Show component health
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health = client.health().await?;

    match format {
        OutputFormat::Json => print_json(&health)?,
        OutputFormat::Table => {
            println!("Overall: {}", color_status(&health.status));
            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(&component.status),
                    message: component.message.clone().unwrap_or_default(),
                    updated: format_timestamp(component.updated_at),
                })
                .collect();
            print_table(rows, "No components registered");
        }
    }

    Ok(())
}
