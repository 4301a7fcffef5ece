//! Core data models shared by the pipeline stages

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of normalized features per cell
pub const NUM_FEATURES: usize = 5;

/// Raw per-cell observation. Numeric fields are optional so that a malformed
/// or partial record can still be represented and repaired downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellMetrics {
    pub cell_id: String,
    /// Resource block utilization in percent
    #[serde(default)]
    pub load: Option<f64>,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    /// Fraction of failed transmissions in `[0, 1]`
    #[serde(default)]
    pub error_rate: Option<f64>,
    #[serde(default)]
    pub throughput_mbps: Option<f64>,
    #[serde(default)]
    pub active_users: Option<f64>,
}

impl CellMetrics {
    /// A fully populated observation
    pub fn new(
        cell_id: impl Into<String>,
        load: f64,
        latency_ms: f64,
        error_rate: f64,
        throughput_mbps: f64,
        active_users: f64,
    ) -> Self {
        Self {
            cell_id: cell_id.into(),
            load: Some(load),
            latency_ms: Some(latency_ms),
            error_rate: Some(error_rate),
            throughput_mbps: Some(throughput_mbps),
            active_users: Some(active_users),
        }
    }

    /// An observation carrying only the load
    pub fn with_load(cell_id: impl Into<String>, load: f64) -> Self {
        Self {
            cell_id: cell_id.into(),
            load: Some(load),
            latency_ms: None,
            error_rate: None,
            throughput_mbps: None,
            active_users: None,
        }
    }
}

/// One timestamped network observation covering every cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub tick: u64,
    /// Unix timestamp in seconds
    pub timestamp: i64,
    pub cells: Vec<CellMetrics>,
}

/// Normalized features for a single cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellFeatures {
    pub cell_id: String,
    pub load: f64,
    pub latency: f64,
    pub error_rate: f64,
    pub throughput: f64,
    pub users: f64,
    /// Cleaned load in percent, `None` when the record had no usable load
    pub observed_demand: Option<f64>,
}

impl CellFeatures {
    pub fn as_array(&self) -> [f64; NUM_FEATURES] {
        [
            self.load,
            self.latency,
            self.error_rate,
            self.throughput,
            self.users,
        ]
    }
}

/// Feature vector derived from one metric record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub tick: u64,
    pub timestamp: i64,
    pub cells: Vec<CellFeatures>,
    /// Number of values that were clipped or imputed
    pub imputed: u32,
}

impl FeatureVector {
    pub fn cell(&self, cell_id: &str) -> Option<&CellFeatures> {
        self.cells.iter().find(|c| c.cell_id == cell_id)
    }
}

/// Predicted demand for one cell, in load percent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellPrediction {
    pub cell_id: String,
    pub demand: f64,
}

/// Demand forecast produced at `tick` for `target_tick`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub tick: u64,
    pub target_tick: u64,
    pub timestamp: i64,
    pub cells: Vec<CellPrediction>,
    pub model_version: String,
    /// Produced by the fallback predictor rather than the fitted model
    pub fallback: bool,
}

impl Prediction {
    pub fn demand(&self, cell_id: &str) -> Option<f64> {
        self.cells
            .iter()
            .find(|c| c.cell_id == cell_id)
            .map(|c| c.demand)
    }

    pub fn total_demand(&self) -> f64 {
        self.cells.iter().map(|c| c.demand).sum()
    }
}

/// Features of a cell at tick t paired with its observed demand at t+1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub features: [f64; NUM_FEATURES],
    pub target: f64,
}

/// Drift detector status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftStatus {
    Stable,
    Warning,
    Drifting,
}

impl DriftStatus {
    /// Escalation level used for ordering transitions
    pub fn level(&self) -> u8 {
        match self {
            DriftStatus::Stable => 0,
            DriftStatus::Warning => 1,
            DriftStatus::Drifting => 2,
        }
    }
}

impl std::fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriftStatus::Stable => write!(f, "STABLE"),
            DriftStatus::Warning => write!(f, "WARNING"),
            DriftStatus::Drifting => write!(f, "DRIFTING"),
        }
    }
}

/// Snapshot of the drift detector after a residual update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftState {
    pub status: DriftStatus,
    pub baseline_mean: f64,
    pub baseline_std: f64,
    /// `None` while the baseline window is still filling
    pub statistic: Option<f64>,
    pub last_residual: Option<f64>,
    pub residuals_seen: u64,
    /// Consecutive ticks counted toward the pending transition
    pub streak: u32,
    pub rebaselines: u32,
}

impl Default for DriftState {
    fn default() -> Self {
        Self {
            status: DriftStatus::Stable,
            baseline_mean: 0.0,
            baseline_std: 0.0,
            statistic: None,
            last_residual: None,
            residuals_seen: 0,
            streak: 0,
            rebaselines: 0,
        }
    }
}

/// Recommendation derived from predicted utilization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtilizationAction {
    ScaleUp,
    Hold,
    ScaleDown,
}

impl std::fmt::Display for UtilizationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UtilizationAction::ScaleUp => write!(f, "scale_up"),
            UtilizationAction::Hold => write!(f, "hold"),
            UtilizationAction::ScaleDown => write!(f, "scale_down"),
        }
    }
}

/// Resource shares granted to one cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellAllocation {
    pub cell_id: String,
    pub predicted_demand: f64,
    /// Resource type name to share, in that resource's capacity units
    pub shares: BTreeMap<String, f64>,
    pub action: UtilizationAction,
}

/// Per-cell allocation computed for one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub tick: u64,
    pub timestamp: i64,
    pub cells: Vec<CellAllocation>,
    /// Blended with the previous plan because drift was active
    pub smoothed: bool,
}

impl AllocationPlan {
    pub fn share(&self, cell_id: &str, resource: &str) -> Option<f64> {
        self.cells
            .iter()
            .find(|c| c.cell_id == cell_id)
            .and_then(|c| c.shares.get(resource).copied())
    }

    /// Shares of one resource type in cell order
    pub fn shares_of(&self, resource: &str) -> Vec<f64> {
        self.cells
            .iter()
            .map(|c| c.shares.get(resource).copied().unwrap_or(0.0))
            .collect()
    }

    pub fn total_share(&self, resource: &str) -> f64 {
        self.shares_of(resource).iter().sum()
    }

    pub fn cell_ids(&self) -> Vec<&str> {
        self.cells.iter().map(|c| c.cell_id.as_str()).collect()
    }
}
