//! Simulation configuration
//!
//! Every field carries a default so a partial file or a handful of
//! environment overrides is enough to start a run. All values are static for
//! the duration of one run; `validate` must pass before the pipeline is built.

use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Top-level configuration for one simulation run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub preprocess: PreprocessConfig,
    pub predictor: PredictorConfig,
    pub drift: DriftConfig,
    pub data_drift: DataDriftConfig,
    pub allocator: AllocatorConfig,
    pub source: SourceConfig,
    pub orchestrator: OrchestratorConfig,
}

impl SimulationConfig {
    /// Check every section; the first violation is returned
    pub fn validate(&self) -> Result<()> {
        self.preprocess.validate()?;
        self.predictor.validate()?;
        self.drift.validate()?;
        self.data_drift.validate()?;
        self.allocator.validate()?;
        self.source.validate()?;
        self.orchestrator.validate()?;

        if self.source.kind == SourceKind::Synthetic {
            self.allocator.validate_for_cells(self.source.cells)?;
        }
        Ok(())
    }
}

/// Normalization bounds for the preprocessor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub max_latency_ms: f64,
    pub max_throughput_mbps: f64,
    pub max_active_users: f64,
    /// Normalized value substituted for missing features
    pub sentinel: f64,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            max_latency_ms: 200.0,
            max_throughput_mbps: 1000.0,
            max_active_users: 1000.0,
            sentinel: 0.0,
        }
    }
}

impl PreprocessConfig {
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("max_latency_ms", self.max_latency_ms),
            ("max_throughput_mbps", self.max_throughput_mbps),
            ("max_active_users", self.max_active_users),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(SimError::config(format!(
                    "preprocess.{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.sentinel) {
            return Err(SimError::config(format!(
                "preprocess.sentinel must be in [0, 1], got {}",
                self.sentinel
            )));
        }
        Ok(())
    }
}

/// What the orchestrator does when no fitted model exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailablePolicy {
    /// Predict with naive persistence
    #[default]
    Fallback,
    /// Drop the tick without predicting or allocating
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// Refit cadence in ticks
    pub retrain_every: u64,
    /// Maximum number of training samples retained
    pub history_capacity: usize,
    pub min_training_samples: usize,
    /// Ridge penalty added to the normal equations
    pub ridge_lambda: f64,
    pub unavailable_policy: UnavailablePolicy,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            retrain_every: 50,
            history_capacity: 5000,
            min_training_samples: 20,
            ridge_lambda: 1e-3,
            unavailable_policy: UnavailablePolicy::Fallback,
        }
    }
}

impl PredictorConfig {
    fn validate(&self) -> Result<()> {
        if self.retrain_every == 0 {
            return Err(SimError::config("predictor.retrain_every must be at least 1"));
        }
        if self.min_training_samples == 0 {
            return Err(SimError::config(
                "predictor.min_training_samples must be at least 1",
            ));
        }
        if self.history_capacity < self.min_training_samples {
            return Err(SimError::config(format!(
                "predictor.history_capacity ({}) is smaller than min_training_samples ({})",
                self.history_capacity, self.min_training_samples
            )));
        }
        if !(self.ridge_lambda.is_finite() && self.ridge_lambda >= 0.0) {
            return Err(SimError::config("predictor.ridge_lambda must be non-negative"));
        }
        Ok(())
    }
}

/// Drift statistic implementation selected at construction time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticKind {
    #[default]
    ZScore,
    Cusum,
    Ewma,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    pub statistic: StatisticKind,
    /// Statistic level that opens a warning episode
    pub warn_threshold: f64,
    /// Statistic level that counts toward drift confirmation
    pub drift_threshold: f64,
    /// Consecutive ticks required before a transition is honored
    #[serde(alias = "k")]
    pub hysteresis: u32,
    /// Residuals used to learn (and re-learn) the baseline
    pub window: usize,
    /// EWMA adaptation rate of the baseline while stable; 0 freezes it
    pub baseline_alpha: f64,
    pub cusum_slack: f64,
    pub ewma_lambda: f64,
    /// Floor applied to the baseline standard deviation, in load percent
    pub min_std: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            statistic: StatisticKind::ZScore,
            warn_threshold: 2.0,
            drift_threshold: 3.0,
            hysteresis: 3,
            window: 30,
            baseline_alpha: 0.0,
            cusum_slack: 0.5,
            ewma_lambda: 0.3,
            min_std: 0.1,
        }
    }
}

impl DriftConfig {
    fn validate(&self) -> Result<()> {
        if !(self.warn_threshold.is_finite() && self.warn_threshold > 0.0) {
            return Err(SimError::config("drift.warn_threshold must be positive"));
        }
        if !(self.drift_threshold.is_finite() && self.drift_threshold >= self.warn_threshold) {
            return Err(SimError::config(format!(
                "drift.drift_threshold ({}) must be >= warn_threshold ({})",
                self.drift_threshold, self.warn_threshold
            )));
        }
        if self.hysteresis == 0 {
            return Err(SimError::config("drift.hysteresis must be at least 1"));
        }
        if self.window < 2 {
            return Err(SimError::config("drift.window must be at least 2"));
        }
        if !(0.0..1.0).contains(&self.baseline_alpha) {
            return Err(SimError::config("drift.baseline_alpha must be in [0, 1)"));
        }
        if !(self.cusum_slack.is_finite() && self.cusum_slack >= 0.0) {
            return Err(SimError::config("drift.cusum_slack must be non-negative"));
        }
        if !(self.ewma_lambda > 0.0 && self.ewma_lambda <= 1.0) {
            return Err(SimError::config("drift.ewma_lambda must be in (0, 1]"));
        }
        if !(self.min_std.is_finite() && self.min_std > 0.0) {
            return Err(SimError::config("drift.min_std must be positive"));
        }
        Ok(())
    }
}

/// Per-feature PSI monitoring of the model inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataDriftConfig {
    pub enabled: bool,
    /// PSI above which a feature is reported as drifting
    pub psi_threshold: f64,
    /// Equal-width bins over the normalized `[0, 1]` range
    pub bins: usize,
    /// Ticks in the reference window and in the rolling current window
    pub window: usize,
}

impl Default for DataDriftConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            psi_threshold: 0.1,
            bins: 10,
            window: 100,
        }
    }
}

impl DataDriftConfig {
    fn validate(&self) -> Result<()> {
        if !(self.psi_threshold.is_finite() && self.psi_threshold > 0.0) {
            return Err(SimError::config("data_drift.psi_threshold must be positive"));
        }
        if self.bins < 2 {
            return Err(SimError::config("data_drift.bins must be at least 2"));
        }
        if self.window == 0 {
            return Err(SimError::config("data_drift.window must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Total capacity per resource type
    pub capacity: BTreeMap<String, f64>,
    /// Minimum share guaranteed to every active cell, per resource type
    pub min_share: f64,
    /// Weight of the new plan when blending during drift
    pub smoothing: f64,
    pub high_utilization_threshold: f64,
    pub low_utilization_threshold: f64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        let mut capacity = BTreeMap::new();
        capacity.insert("bandwidth_prb".to_string(), 100.0);
        Self {
            capacity,
            min_share: 1.0,
            smoothing: 0.7,
            high_utilization_threshold: 85.0,
            low_utilization_threshold: 30.0,
        }
    }
}

impl AllocatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity.is_empty() {
            return Err(SimError::config("allocator.capacity must name at least one resource"));
        }
        for (resource, total) in &self.capacity {
            if !(total.is_finite() && *total > 0.0) {
                return Err(SimError::config(format!(
                    "allocator.capacity.{} must be positive, got {}",
                    resource, total
                )));
            }
        }
        if !(self.min_share.is_finite() && self.min_share >= 0.0) {
            return Err(SimError::config("allocator.min_share must be non-negative"));
        }
        if !(0.0..=1.0).contains(&self.smoothing) {
            return Err(SimError::config("allocator.smoothing must be in [0, 1]"));
        }
        if self.low_utilization_threshold > self.high_utilization_threshold {
            return Err(SimError::config(
                "allocator.low_utilization_threshold exceeds high_utilization_threshold",
            ));
        }
        Ok(())
    }

    /// Check that the minimum share fits every resource for `cells` cells
    pub fn validate_for_cells(&self, cells: usize) -> Result<()> {
        let floor = self.min_share * cells as f64;
        for (resource, total) in &self.capacity {
            if floor > *total {
                return Err(SimError::config(format!(
                    "allocator.min_share {} x {} cells exceeds {} capacity {}",
                    self.min_share, cells, resource, total
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Synthetic,
    Replay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub seed: u64,
    pub cells: usize,
    /// Ticks spent in each synthetic traffic phase
    pub phase_length: u64,
    /// Probability that any single metric is dropped
    pub missing_rate: f64,
    pub start_timestamp: i64,
    /// Seconds between consecutive records
    pub tick_seconds: i64,
    /// JSON-lines corpus for the replay source
    pub replay_path: Option<PathBuf>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Synthetic,
            seed: 42,
            cells: 10,
            phase_length: 500,
            missing_rate: 0.01,
            start_timestamp: 1_700_000_000,
            tick_seconds: 1,
            replay_path: None,
        }
    }
}

impl SourceConfig {
    fn validate(&self) -> Result<()> {
        if self.cells == 0 {
            return Err(SimError::config("source.cells must be at least 1"));
        }
        if self.phase_length == 0 {
            return Err(SimError::config("source.phase_length must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.missing_rate) {
            return Err(SimError::config("source.missing_rate must be in [0, 1]"));
        }
        if self.kind == SourceKind::Replay && self.replay_path.is_none() {
            return Err(SimError::config("source.replay_path is required for replay"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Identifier attached to logs and artifacts
    pub run_id: String,
    /// Stop after this many ticks; `None` runs until the source is exhausted
    pub max_ticks: Option<u64>,
    /// Pause between ticks in milliseconds; 0 runs as fast as possible
    pub tick_interval_ms: u64,
    /// Capacity of the visualization channel before old events are dropped
    pub event_buffer: usize,
    /// Events kept in the in-memory history served by the API
    pub history_limit: usize,
    /// JSON-lines artifact receiving every tick event
    pub artifact_path: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            run_id: "run-1".to_string(),
            max_ticks: Some(2000),
            tick_interval_ms: 0,
            event_buffer: 256,
            history_limit: 500,
            artifact_path: None,
        }
    }
}

impl OrchestratorConfig {
    fn validate(&self) -> Result<()> {
        if self.event_buffer == 0 {
            return Err(SimError::config("orchestrator.event_buffer must be at least 1"));
        }
        if self.history_limit == 0 {
            return Err(SimError::config("orchestrator.history_limit must be at least 1"));
        }
        Ok(())
    }
}
