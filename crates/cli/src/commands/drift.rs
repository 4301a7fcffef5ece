//! Drift state and timeline command

use anyhow::Result;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_status, format_optional, print_header, print_json, print_table, OutputFormat};

/// Row for drift timeline table
#[derive(Tabled)]
struct DriftRow {
    #[tabled(rename = "Tick")]
    tick: u64,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Statistic")]
    statistic: String,
    #[tabled(rename = "Residual")]
    residual: String,
}

/// Show the detector state and the tail of its timeline
pub async fn show_drift(client: &ApiClient, last: usize, format: OutputFormat) -> Result<()> {
    let mut snapshot = client.drift().await?;
    let skip = snapshot.timeline.len().saturating_sub(last);
    snapshot.timeline.drain(..skip);

    match format {
        OutputFormat::Json => print_json(&snapshot)?,
        OutputFormat::Table => {
            let state = &snapshot.state;
            print_header("Drift Detector", 50);
            println!("Status:                 {}", color_status(&state.status));
            println!(
                "Baseline:               {:.4} ± {:.4}",
                state.baseline_mean, state.baseline_std
            );
            println!("Statistic:              {}", format_optional(state.statistic));
            println!("Residuals seen:         {}", state.residuals_seen);
            println!("Streak:                 {}", state.streak);
            println!("Rebaselines:            {}", state.rebaselines);
            println!();

            let rows: Vec<DriftRow> = snapshot
                .timeline
                .iter()
                .map(|p| DriftRow {
                    tick: p.tick,
                    status: color_status(&p.status),
                    statistic: format_optional(p.statistic),
                    residual: format_optional(p.residual),
                })
                .collect();
            print_table(rows, "No drift history yet");
        }
    }

    Ok(())
}
