//! Resource allocation
//!
//! Splits each resource type's capacity across cells in proportion to their
//! predicted demand. Every cell is guaranteed `min_share`; cells pushed below
//! it are pinned to the floor and the remainder is re-split among the rest.
//! While drift is confirmed the new plan is blended with the previous one to
//! avoid reacting to a model that is known to be off.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::AllocatorConfig;
use crate::error::Result;
use crate::models::{
    AllocationPlan, CellAllocation, DriftState, DriftStatus, Prediction, UtilizationAction,
};

/// Computes per-cell resource shares under capacity constraints
#[derive(Debug, Clone)]
pub struct Allocator {
    config: AllocatorConfig,
}

impl Allocator {
    /// Create an allocator, rejecting invalid capacities
    pub fn new(config: AllocatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Build the plan for the cells of `prediction`.
    ///
    /// `previous` is only used while `drift` is DRIFTING, and only when it
    /// covers the same cells and resource types.
    pub fn allocate(
        &self,
        prediction: &Prediction,
        drift: &DriftState,
        previous: Option<&AllocationPlan>,
    ) -> Result<AllocationPlan> {
        let cell_count = prediction.cells.len();
        self.config.validate_for_cells(cell_count)?;

        let demands: Vec<f64> = prediction
            .cells
            .iter()
            .map(|c| sanitize_demand(c.demand))
            .collect();

        let mut per_resource = BTreeMap::new();
        for (resource, capacity) in &self.config.capacity {
            let shares = water_fill(&demands, *capacity, self.config.min_share);
            per_resource.insert(resource.as_str(), shares);
        }

        let cells: Vec<CellAllocation> = prediction
            .cells
            .iter()
            .enumerate()
            .map(|(i, cell)| CellAllocation {
                cell_id: cell.cell_id.clone(),
                predicted_demand: demands[i],
                shares: per_resource
                    .iter()
                    .map(|(resource, shares)| (resource.to_string(), shares[i]))
                    .collect(),
                action: self.action_for(demands[i]),
            })
            .collect();

        let mut plan = AllocationPlan {
            tick: prediction.tick,
            timestamp: prediction.timestamp,
            cells,
            smoothed: false,
        };

        if drift.status == DriftStatus::Drifting {
            if let Some(previous) = previous.filter(|p| same_layout(p, &plan)) {
                self.blend(&mut plan, previous);
            }
        }

        Ok(plan)
    }

    /// Recommendation for a cell at the given predicted utilization
    pub fn action_for(&self, utilization: f64) -> UtilizationAction {
        if utilization > self.config.high_utilization_threshold {
            UtilizationAction::ScaleUp
        } else if utilization < self.config.low_utilization_threshold {
            UtilizationAction::ScaleDown
        } else {
            UtilizationAction::Hold
        }
    }

    fn blend(&self, plan: &mut AllocationPlan, previous: &AllocationPlan) {
        let alpha = self.config.smoothing;
        for (cell, old) in plan.cells.iter_mut().zip(previous.cells.iter()) {
            for (resource, share) in cell.shares.iter_mut() {
                if let Some(old_share) = old.shares.get(resource) {
                    *share = alpha * *share + (1.0 - alpha) * old_share;
                }
            }
        }

        for (resource, capacity) in &self.config.capacity {
            let mut shares = plan.shares_of(resource);
            clamp_to_capacity(&mut shares, *capacity);
            for (cell, share) in plan.cells.iter_mut().zip(shares) {
                cell.shares.insert(resource.clone(), share);
            }
        }

        plan.smoothed = true;
        debug!(tick = plan.tick, alpha, "Blended allocation with previous plan");
    }
}

/// Non-finite and negative demand counts as none
fn sanitize_demand(demand: f64) -> f64 {
    if demand.is_finite() && demand > 0.0 {
        demand
    } else {
        0.0
    }
}

/// Proportional split of `capacity` with a per-cell floor of `min_share`.
///
/// Requires `min_share * demands.len() <= capacity`.
fn water_fill(demands: &[f64], capacity: f64, min_share: f64) -> Vec<f64> {
    let n = demands.len();
    if n == 0 {
        return Vec::new();
    }

    let total: f64 = demands.iter().sum();
    if total <= 0.0 {
        return vec![capacity / n as f64; n];
    }

    let mut floored = vec![false; n];
    let mut shares = vec![0.0; n];
    loop {
        let pinned = floored.iter().filter(|f| **f).count();
        let remaining = capacity - min_share * pinned as f64;
        let active_demand: f64 = demands
            .iter()
            .zip(&floored)
            .filter(|(_, f)| !**f)
            .map(|(d, _)| d)
            .sum();
        let active = n - pinned;

        let mut changed = false;
        for i in 0..n {
            if floored[i] {
                shares[i] = min_share;
                continue;
            }
            shares[i] = if active_demand > 0.0 {
                remaining * demands[i] / active_demand
            } else {
                remaining / active as f64
            };
            if shares[i] < min_share {
                floored[i] = true;
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    clamp_to_capacity(&mut shares, capacity);
    shares
}

/// Remove floating point overshoot from the largest share
fn clamp_to_capacity(shares: &mut [f64], capacity: f64) {
    let total: f64 = shares.iter().sum();
    let excess = total - capacity;
    if excess <= 0.0 {
        return;
    }
    if let Some(largest) = shares
        .iter_mut()
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    {
        *largest = (*largest - excess).max(0.0);
    }
}

fn same_layout(previous: &AllocationPlan, plan: &AllocationPlan) -> bool {
    previous.cells.len() == plan.cells.len()
        && previous.cells.iter().zip(&plan.cells).all(|(a, b)| {
            a.cell_id == b.cell_id && a.shares.keys().eq(b.shares.keys())
        })
}
