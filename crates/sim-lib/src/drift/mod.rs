//! Drift detection and alerting
//!
//! This module provides:
//! - Residual drift statistics (z-score, CUSUM, EWMA)
//! - The hysteresis state machine deciding STABLE / WARNING / DRIFTING
//! - Per-feature PSI monitoring of the model inputs
//! - Alert debouncing and Alertmanager export

mod alerter;
mod data_drift;
mod detector;
mod statistic;

pub use alerter::{
    AlertEvent, AlertKind, AlertManager, AlertSeverity, AlertmanagerAlert, AlertmanagerPayload,
};
pub use data_drift::{population_stability_index, DataDriftMonitor, FeatureDrift, FEATURE_NAMES};
pub use detector::DriftDetector;
pub use statistic::{build_statistic, Baseline, Cusum, DriftSignal, DriftStatistic, Ewma, ZScore};
