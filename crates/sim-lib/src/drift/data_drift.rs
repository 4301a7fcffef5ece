//! Input data drift
//!
//! Compares the distribution of every normalized input feature over a rolling
//! current window against a reference window captured at the start of the
//! run, using the population stability index (PSI). A feature is reported
//! once when its PSI rises above the threshold and re-armed when it falls
//! back below it.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DataDriftConfig;
use crate::models::{FeatureVector, NUM_FEATURES};

/// Feature names, in `CellFeatures::as_array` order
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "load",
    "latency_ms",
    "error_rate",
    "throughput_mbps",
    "active_users",
];

/// Proportion substituted for empty bins so the logarithm stays finite
const EMPTY_BIN_PROPORTION: f64 = 1e-4;

/// PSI of one feature at the time it crossed the threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDrift {
    pub feature: String,
    pub psi: f64,
    pub threshold: f64,
}

/// Population stability index between two samples of values in `[0, 1]`.
///
/// Returns `None` when either sample is empty or fewer than two bins are
/// requested.
pub fn population_stability_index(reference: &[f64], current: &[f64], bins: usize) -> Option<f64> {
    if reference.is_empty() || current.is_empty() || bins < 2 {
        return None;
    }
    let expected = histogram(reference.iter().copied(), bins);
    let actual = histogram(current.iter().copied(), bins);
    Some(psi(&expected, &actual))
}

fn bin_of(value: f64, bins: usize) -> usize {
    ((value.clamp(0.0, 1.0) * bins as f64) as usize).min(bins - 1)
}

/// Bin proportions with empty bins floored
fn histogram(values: impl Iterator<Item = f64>, bins: usize) -> Vec<f64> {
    let mut counts = vec![0usize; bins];
    let mut total = 0usize;
    for value in values.filter(|v| v.is_finite()) {
        counts[bin_of(value, bins)] += 1;
        total += 1;
    }
    counts
        .into_iter()
        .map(|c| {
            if total == 0 {
                EMPTY_BIN_PROPORTION
            } else {
                (c as f64 / total as f64).max(EMPTY_BIN_PROPORTION)
            }
        })
        .collect()
}

fn psi(expected: &[f64], actual: &[f64]) -> f64 {
    expected
        .iter()
        .zip(actual)
        .map(|(e, a)| (a - e) * (a / e).ln())
        .sum()
}

/// Rows of per-cell feature values observed on one tick
type TickRows = Vec<[f64; NUM_FEATURES]>;

/// Per-feature PSI monitor over the preprocessed feature stream
pub struct DataDriftMonitor {
    config: DataDriftConfig,
    reference: Vec<TickRows>,
    /// Reference proportions per feature, fixed once the window is full
    expected: Option<Vec<Vec<f64>>>,
    current: VecDeque<TickRows>,
    scores: Option<[f64; NUM_FEATURES]>,
    drifting: [bool; NUM_FEATURES],
}

impl DataDriftMonitor {
    pub fn new(config: DataDriftConfig) -> Self {
        let window = config.window.max(1);
        Self {
            reference: Vec::with_capacity(window),
            current: VecDeque::with_capacity(window),
            expected: None,
            scores: None,
            drifting: [false; NUM_FEATURES],
            config,
        }
    }

    /// Feed one tick of features; returns the features whose PSI crossed the
    /// threshold on this tick
    pub fn observe(&mut self, features: &FeatureVector) -> Vec<FeatureDrift> {
        if !self.config.enabled || features.cells.is_empty() {
            return Vec::new();
        }
        let rows: TickRows = features.cells.iter().map(|c| c.as_array()).collect();
        let window = self.config.window.max(1);

        if self.expected.is_none() {
            self.reference.push(rows);
            if self.reference.len() == window {
                let expected = (0..NUM_FEATURES)
                    .map(|f| histogram(column(self.reference.iter(), f), self.config.bins))
                    .collect();
                self.expected = Some(expected);
                debug!(ticks = window, "Data drift reference window captured");
            }
            return Vec::new();
        }

        if self.current.len() == window {
            self.current.pop_front();
        }
        self.current.push_back(rows);
        if self.current.len() < window {
            return Vec::new();
        }

        let Some(expected) = self.expected.as_ref() else {
            return Vec::new();
        };
        let mut scores = [0.0f64; NUM_FEATURES];
        for (f, score) in scores.iter_mut().enumerate() {
            let actual = histogram(column(self.current.iter(), f), self.config.bins);
            *score = psi(&expected[f], &actual);
        }
        self.scores = Some(scores);

        let mut crossed = Vec::new();
        for (f, score) in scores.iter().enumerate() {
            let above = *score > self.config.psi_threshold;
            if above && !self.drifting[f] {
                crossed.push(FeatureDrift {
                    feature: FEATURE_NAMES[f].to_string(),
                    psi: *score,
                    threshold: self.config.psi_threshold,
                });
            }
            self.drifting[f] = above;
        }
        crossed
    }

    /// Latest PSI per feature, once both windows are full
    pub fn scores(&self) -> Option<[f64; NUM_FEATURES]> {
        self.scores
    }

    /// Names of the features currently above the threshold
    pub fn drifting_features(&self) -> Vec<&'static str> {
        FEATURE_NAMES
            .iter()
            .zip(self.drifting.iter())
            .filter(|(_, drifting)| **drifting)
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn has_reference(&self) -> bool {
        self.expected.is_some()
    }
}

fn column<'a>(
    ticks: impl Iterator<Item = &'a TickRows> + 'a,
    feature: usize,
) -> impl Iterator<Item = f64> + 'a {
    ticks.flatten().map(move |row| row[feature])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CellFeatures;
    use approx::assert_relative_eq;

    fn config(window: usize) -> DataDriftConfig {
        DataDriftConfig {
            enabled: true,
            psi_threshold: 0.1,
            bins: 10,
            window,
        }
    }

    /// Two identical cells with the given normalized latency
    fn tick(t: u64, latency: f64) -> FeatureVector {
        FeatureVector {
            tick: t,
            timestamp: 1_700_000_000 + t as i64,
            cells: ["Cell-1", "Cell-2"]
                .iter()
                .map(|id| CellFeatures {
                    cell_id: id.to_string(),
                    load: 0.5,
                    latency,
                    error_rate: 0.01,
                    throughput: 0.4,
                    users: 0.2,
                    observed_demand: Some(50.0),
                })
                .collect(),
            imputed: 0,
        }
    }

    fn spread(t: u64, low: f64, high: f64) -> f64 {
        low + (high - low) * ((t * 7) % 20) as f64 / 20.0
    }

    #[test]
    fn test_identical_samples_have_zero_psi() {
        let values: Vec<f64> = (0..100).map(|i| i as f64 / 100.0).collect();
        let psi = population_stability_index(&values, &values, 10).unwrap();
        assert_relative_eq!(psi, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_shifted_sample_scores_high() {
        let reference: Vec<f64> = (0..100).map(|i| 0.1 + 0.2 * i as f64 / 100.0).collect();
        let shifted: Vec<f64> = reference.iter().map(|v| v + 0.4).collect();
        let psi = population_stability_index(&reference, &shifted, 10).unwrap();
        assert!(psi > 1.0, "psi {}", psi);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(population_stability_index(&[], &[0.5], 10).is_none());
        assert!(population_stability_index(&[0.5], &[0.5], 1).is_none());
    }

    #[test]
    fn test_no_scores_until_both_windows_fill() {
        let mut monitor = DataDriftMonitor::new(config(20));
        for t in 1..=39 {
            assert!(monitor.observe(&tick(t, spread(t, 0.05, 0.25))).is_empty());
        }
        assert!(monitor.has_reference());
        assert!(monitor.scores().is_none());

        monitor.observe(&tick(40, spread(40, 0.05, 0.25)));
        let scores = monitor.scores().unwrap();
        assert!(scores.iter().all(|s| *s < 0.1), "{:?}", scores);
    }

    #[test]
    fn test_latency_shift_reported_once_per_crossing() {
        let mut monitor = DataDriftMonitor::new(config(20));
        for t in 1..=40 {
            monitor.observe(&tick(t, spread(t, 0.05, 0.25)));
        }

        let mut reported = Vec::new();
        for t in 41..=100 {
            reported.extend(monitor.observe(&tick(t, spread(t, 0.4, 0.6))));
        }
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].feature, "latency_ms");
        assert!(reported[0].psi > 0.1);
        assert_eq!(monitor.drifting_features(), vec!["latency_ms"]);

        // back to the reference distribution re-arms the feature
        for t in 101..=140 {
            assert!(monitor.observe(&tick(t, spread(t, 0.05, 0.25))).is_empty());
        }
        assert!(monitor.drifting_features().is_empty());

        let again: Vec<_> = (141..=180)
            .flat_map(|t| monitor.observe(&tick(t, spread(t, 0.4, 0.6))))
            .collect();
        assert_eq!(again.len(), 1);
    }

    #[test]
    fn test_disabled_monitor_stays_silent() {
        let mut monitor = DataDriftMonitor::new(DataDriftConfig {
            enabled: false,
            ..config(5)
        });
        for t in 1..=30 {
            let latency = if t > 10 { 0.9 } else { 0.1 };
            assert!(monitor.observe(&tick(t, latency)).is_empty());
        }
        assert!(!monitor.has_reference());
    }
}
