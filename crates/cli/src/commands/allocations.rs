//! Allocation plan listing command

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{AllocationPlan, ApiClient};
use crate::output::{color_status, print_json, print_table, OutputFormat};

/// Row for allocations table, one per cell and tick
#[derive(Tabled)]
struct AllocationRow {
    #[tabled(rename = "Tick")]
    tick: u64,
    #[tabled(rename = "Cell")]
    cell: String,
    #[tabled(rename = "Demand")]
    demand: String,
    #[tabled(rename = "Shares")]
    shares: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Smoothed")]
    smoothed: String,
}

fn rows(plans: &[AllocationPlan]) -> Vec<AllocationRow> {
    plans
        .iter()
        .flat_map(|plan| {
            plan.cells.iter().map(move |cell| AllocationRow {
                tick: plan.tick,
                cell: cell.cell_id.clone(),
                demand: format!("{:.1}", cell.predicted_demand),
                shares: cell
                    .shares
                    .iter()
                    .map(|(resource, share)| format!("{}={:.2}", resource, share))
                    .collect::<Vec<_>>()
                    .join(", "),
                action: color_status(&cell.action),
                smoothed: if plan.smoothed {
                    "yes".yellow().to_string()
                } else {
                    "no".to_string()
                },
            })
        })
        .collect()
}

/// List the most recent allocation plans
pub async fn list_allocations(client: &ApiClient, limit: usize, format: OutputFormat) -> Result<()> {
    let plans = client.allocations(limit).await?;

    match format {
        OutputFormat::Json => print_json(&plans)?,
        OutputFormat::Table => {
            print_table(rows(&plans), "No allocation plans yet");
            if !plans.is_empty() {
                println!("\nShowing {} plans", plans.len());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CellAllocation;
    use std::collections::BTreeMap;

    #[test]
    fn test_one_row_per_cell() {
        colored::control::set_override(false);
        let cell = |id: &str, share: f64| CellAllocation {
            cell_id: id.to_string(),
            predicted_demand: share,
            shares: BTreeMap::from([
                ("bandwidth_prb".to_string(), share),
                ("compute".to_string(), share / 2.0),
            ]),
            action: "hold".to_string(),
        };
        let plans = vec![AllocationPlan {
            tick: 4,
            timestamp: 1_700_000_004,
            cells: vec![cell("Cell-1", 70.0), cell("Cell-2", 30.0)],
            smoothed: false,
        }];

        let rows = rows(&plans);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].shares, "bandwidth_prb=70.00, compute=35.00");
        assert_eq!(rows[1].cell, "Cell-2");
        assert_eq!(rows[1].smoothed, "no");
    }
}
