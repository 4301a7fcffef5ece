//! Alert listing command

use anyhow::Result;
use tabled::Tabled;

use crate::client::{Alert, ApiClient};
use crate::output::{color_status, format_timestamp, print_json, print_table, OutputFormat};

/// Row for alerts table
#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "Tick")]
    tick: u64,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Episode Start")]
    episode_start: String,
}

/// Keep alerts of one severity, when asked to
fn filter_by_severity(alerts: Vec<Alert>, severity: Option<&str>) -> Vec<Alert> {
    match severity {
        Some(severity) => alerts
            .into_iter()
            .filter(|a| a.severity.eq_ignore_ascii_case(severity))
            .collect(),
        None => alerts,
    }
}

/// List alerts raised so far
pub async fn list_alerts(
    client: &ApiClient,
    severity: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let alerts = filter_by_severity(client.alerts().await?, severity.as_deref());

    match format {
        OutputFormat::Json => print_json(&alerts)?,
        OutputFormat::Table => {
            let total = alerts.len();
            let rows: Vec<AlertRow> = alerts
                .iter()
                .map(|a| AlertRow {
                    id: a.id,
                    tick: a.tick,
                    time: format_timestamp(a.timestamp),
                    severity: color_status(&a.severity),
                    kind: a.kind.clone(),
                    episode_start: format_timestamp(a.episode_start),
                })
                .collect();
            print_table(rows, "No alerts raised");
            if total > 0 {
                println!("\nTotal: {} alerts", total);
            }
        }
    }

    Ok(())
}
