//! Residual drift detection
//!
//! A hysteresis state machine over prediction residuals:
//!
//! ```text
//! STABLE --(stat > warn)--> WARNING --(stat > drift for k ticks)--> DRIFTING
//!    ^                         |                                       |
//!    +----(k calm ticks)-------+                                       |
//!    +--------------(fresh window collected, rebaseline)---------------+
//! ```
//!
//! The baseline is learned from the first `window` residuals. Until then the
//! detector reports STABLE without a statistic.

use std::collections::VecDeque;

use tracing::debug;

use super::statistic::{build_statistic, Baseline, DriftStatistic};
use crate::config::DriftConfig;
use crate::models::{DriftState, DriftStatus};

/// Internal phase, richer than the public status
#[derive(Debug, Clone, PartialEq)]
enum Phase {
    /// Baseline window still filling
    Warmup,
    Stable,
    Warning { drift_streak: u32, calm_streak: u32 },
    /// Collecting a fresh window for the rebaseline
    Drifting { collected: Vec<f64> },
}

impl Phase {
    fn status(&self) -> DriftStatus {
        match self {
            Phase::Warmup | Phase::Stable => DriftStatus::Stable,
            Phase::Warning { .. } => DriftStatus::Warning,
            Phase::Drifting { .. } => DriftStatus::Drifting,
        }
    }

    fn streak(&self) -> u32 {
        match self {
            Phase::Warmup | Phase::Stable => 0,
            Phase::Warning {
                drift_streak,
                calm_streak,
            } => (*drift_streak).max(*calm_streak),
            Phase::Drifting { collected } => collected.len() as u32,
        }
    }
}

/// Detects distribution shifts in prediction residuals
pub struct DriftDetector {
    config: DriftConfig,
    statistic: Box<dyn DriftStatistic>,
    baseline: Baseline,
    phase: Phase,
    /// Most recent `window` residuals
    recent: VecDeque<f64>,
    state: DriftState,
}

impl DriftDetector {
    /// Create a detector using the statistic named in the configuration
    pub fn new(config: DriftConfig) -> Self {
        let statistic = build_statistic(&config);
        Self::with_statistic(config, statistic)
    }

    /// Create a detector with an explicit statistic implementation
    pub fn with_statistic(config: DriftConfig, statistic: Box<dyn DriftStatistic>) -> Self {
        let window = config.window.max(1);
        Self {
            baseline: Baseline {
                mean: 0.0,
                std_dev: config.min_std,
            },
            config,
            statistic,
            phase: Phase::Warmup,
            recent: VecDeque::with_capacity(window),
            state: DriftState::default(),
        }
    }

    pub fn state(&self) -> &DriftState {
        &self.state
    }

    pub fn status(&self) -> DriftStatus {
        self.state.status
    }

    pub fn baseline(&self) -> Option<Baseline> {
        match self.phase {
            Phase::Warmup => None,
            _ => Some(self.baseline),
        }
    }

    pub fn statistic_name(&self) -> &'static str {
        self.statistic.name()
    }

    /// Fold one residual into the detector and return the updated state.
    ///
    /// Non-finite residuals are ignored.
    pub fn update(&mut self, residual: f64) -> &DriftState {
        if !residual.is_finite() {
            debug!(residual, "Ignoring non-finite residual");
            return &self.state;
        }

        let window = self.config.window.max(1);
        self.state.residuals_seen += 1;
        self.state.last_residual = Some(residual);
        if self.recent.len() == window {
            self.recent.pop_front();
        }
        self.recent.push_back(residual);

        let phase = std::mem::replace(&mut self.phase, Phase::Warmup);
        self.phase = match phase {
            Phase::Warmup if self.recent.len() < window => {
                self.state.statistic = None;
                Phase::Warmup
            }
            Phase::Warmup => {
                let samples: Vec<f64> = self.recent.iter().copied().collect();
                self.install_baseline(Baseline::from_samples(&samples, self.config.min_std));
                debug!(
                    mean = self.baseline.mean,
                    std_dev = self.baseline.std_dev,
                    "Residual baseline learned"
                );
                let value = self.observe(residual);
                self.from_stable(value, residual)
            }
            Phase::Stable => {
                let value = self.observe(residual);
                self.from_stable(value, residual)
            }
            Phase::Warning {
                drift_streak,
                calm_streak,
            } => {
                let value = self.observe(residual);
                self.from_warning(value, drift_streak, calm_streak)
            }
            Phase::Drifting { mut collected } => {
                self.observe(residual);
                collected.push(residual);
                if collected.len() >= window {
                    self.rebaseline_from(&collected);
                    Phase::Stable
                } else {
                    Phase::Drifting { collected }
                }
            }
        };

        self.state.status = self.phase.status();
        self.state.streak = self.phase.streak();
        &self.state
    }

    /// Re-learn the baseline from the most recent `window` residuals and
    /// return to STABLE.
    ///
    /// Returns false, leaving the detector untouched, when fewer than
    /// `window` residuals have been seen.
    pub fn rebaseline(&mut self) -> bool {
        if self.recent.len() < self.config.window.max(1) {
            return false;
        }
        let samples: Vec<f64> = self.recent.iter().copied().collect();
        self.rebaseline_from(&samples);
        self.phase = Phase::Stable;
        self.state.status = DriftStatus::Stable;
        self.state.streak = 0;
        true
    }

    fn observe(&mut self, residual: f64) -> f64 {
        let signal = self.statistic.update(residual, &self.baseline);
        self.state.statistic = Some(signal.value);
        signal.value
    }

    fn from_stable(&mut self, value: f64, residual: f64) -> Phase {
        if value > self.config.drift_threshold {
            if self.config.hysteresis <= 1 {
                return Phase::Drifting {
                    collected: Vec::new(),
                };
            }
            return Phase::Warning {
                drift_streak: 1,
                calm_streak: 0,
            };
        }
        if value > self.config.warn_threshold {
            return Phase::Warning {
                drift_streak: 0,
                calm_streak: 0,
            };
        }

        if self.config.baseline_alpha > 0.0 {
            self.baseline
                .adapt(residual, self.config.baseline_alpha, self.config.min_std);
            self.state.baseline_mean = self.baseline.mean;
            self.state.baseline_std = self.baseline.std_dev;
        }
        Phase::Stable
    }

    fn from_warning(&self, value: f64, drift_streak: u32, calm_streak: u32) -> Phase {
        let k = self.config.hysteresis.max(1);

        if value > self.config.drift_threshold {
            let drift_streak = drift_streak + 1;
            if drift_streak >= k {
                return Phase::Drifting {
                    collected: Vec::new(),
                };
            }
            return Phase::Warning {
                drift_streak,
                calm_streak: 0,
            };
        }

        if value > self.config.warn_threshold {
            return Phase::Warning {
                drift_streak: 0,
                calm_streak: 0,
            };
        }

        let calm_streak = calm_streak + 1;
        if calm_streak >= k {
            Phase::Stable
        } else {
            Phase::Warning {
                drift_streak: 0,
                calm_streak,
            }
        }
    }

    fn install_baseline(&mut self, baseline: Baseline) {
        self.baseline = baseline;
        self.state.baseline_mean = baseline.mean;
        self.state.baseline_std = baseline.std_dev;
    }

    fn rebaseline_from(&mut self, samples: &[f64]) {
        self.install_baseline(Baseline::from_samples(samples, self.config.min_std));
        self.statistic.reset();
        self.state.statistic = Some(0.0);
        self.state.rebaselines += 1;
        debug!(
            mean = self.baseline.mean,
            std_dev = self.baseline.std_dev,
            rebaselines = self.state.rebaselines,
            "Residual baseline re-learned"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StatisticKind;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    /// Zero-mean residuals with sample std close to 0.67
    const CALM: [f64; 10] = [0.5, -0.5, 1.0, -1.0, 0.3, -0.3, 0.8, -0.8, 0.2, -0.2];

    fn config(window: usize, k: u32) -> DriftConfig {
        DriftConfig {
            statistic: StatisticKind::ZScore,
            warn_threshold: 2.0,
            drift_threshold: 3.0,
            hysteresis: k,
            window,
            ..Default::default()
        }
    }

    fn warmed(config: DriftConfig) -> DriftDetector {
        let mut detector = DriftDetector::new(config);
        for r in CALM {
            detector.update(r);
        }
        detector
    }

    #[test]
    fn test_insufficient_history_is_stable_without_statistic() {
        let mut detector = DriftDetector::new(config(10, 3));
        for _ in 0..9 {
            let state = detector.update(50.0);
            assert_eq!(state.status, DriftStatus::Stable);
            assert!(state.statistic.is_none());
        }
        assert!(detector.baseline().is_none());
        assert!(!detector.rebaseline());
    }

    #[test]
    fn test_baseline_learned_from_first_window() {
        let detector = warmed(config(10, 3));
        let baseline = detector.baseline().unwrap();
        assert_relative_eq!(baseline.mean, 0.0, epsilon = 1e-12);
        assert_relative_eq!(baseline.std_dev, (4.04f64 / 9.0).sqrt(), epsilon = 1e-12);
        assert!(detector.state().statistic.is_some());
        assert_eq!(detector.state().residuals_seen, 10);
    }

    #[test]
    fn test_drift_confirmed_after_k_consecutive_ticks() {
        let mut detector = warmed(config(10, 3));

        // residuals 11 and 12 escalate to warning only
        assert_eq!(detector.update(4.8).status, DriftStatus::Warning);
        assert_eq!(detector.update(5.3).status, DriftStatus::Warning);
        // residual 13 is the third consecutive tick beyond the drift threshold
        assert_eq!(detector.update(5.1).status, DriftStatus::Drifting);
        assert_eq!(detector.update(4.6).status, DriftStatus::Drifting);
        assert_eq!(detector.update(5.2).status, DriftStatus::Drifting);
    }

    #[test]
    fn test_single_tick_confirms_when_k_is_one() {
        let mut detector = warmed(config(10, 1));
        assert_eq!(detector.update(6.0).status, DriftStatus::Drifting);
    }

    #[test]
    fn test_warning_resolves_after_calm_ticks() {
        let mut detector = warmed(config(10, 3));
        // between warn and drift thresholds
        assert_eq!(detector.update(1.7).status, DriftStatus::Warning);
        assert_eq!(detector.update(0.1).status, DriftStatus::Warning);
        assert_eq!(detector.update(-0.2).status, DriftStatus::Warning);
        assert_eq!(detector.update(0.0).status, DriftStatus::Stable);
    }

    #[test]
    fn test_interrupted_streak_does_not_confirm() {
        let mut detector = warmed(config(10, 3));
        detector.update(5.0);
        detector.update(5.0);
        // warn level breaks the drift streak
        detector.update(1.7);
        assert_eq!(detector.update(5.0).status, DriftStatus::Warning);
        assert_eq!(detector.update(5.0).status, DriftStatus::Warning);
        assert_eq!(detector.update(5.0).status, DriftStatus::Drifting);
    }

    #[test]
    fn test_rebaseline_after_level_shift() {
        let mut detector = warmed(config(10, 3));
        let shift = 10.0;

        for _ in 0..3 {
            detector.update(shift);
        }
        assert_eq!(detector.status(), DriftStatus::Drifting);

        // a fresh window at the new level
        for i in 0..10 {
            let jitter = if i % 2 == 0 { 0.4 } else { -0.4 };
            detector.update(shift + jitter);
        }

        let state = detector.state();
        assert_eq!(state.status, DriftStatus::Stable);
        assert_eq!(state.rebaselines, 1);
        assert_relative_eq!(state.baseline_mean, shift, epsilon = 1e-9);

        // the new level no longer looks anomalous
        assert_eq!(detector.update(shift + 0.3).status, DriftStatus::Stable);
    }

    #[test]
    fn test_explicit_rebaseline_uses_recent_window() {
        let mut detector = warmed(config(10, 3));
        for _ in 0..10 {
            detector.update(7.0);
        }
        assert!(detector.rebaseline());
        assert_eq!(detector.status(), DriftStatus::Stable);
        assert_relative_eq!(detector.state().baseline_mean, 7.0);
    }

    #[test]
    fn test_flat_warmup_tolerates_small_jitter() {
        let mut detector = DriftDetector::new(config(10, 3));
        for _ in 0..10 {
            detector.update(0.0);
        }
        assert_relative_eq!(detector.baseline().unwrap().std_dev, 0.1);

        for i in 0..20 {
            let jitter = if i % 2 == 0 { 0.01 } else { -0.01 };
            assert_eq!(detector.update(jitter).status, DriftStatus::Stable);
        }
        // a real shift still escalates
        assert_eq!(detector.update(1.0).status, DriftStatus::Warning);
    }

    #[test]
    fn test_non_finite_residual_ignored() {
        let mut detector = warmed(config(10, 3));
        let before = detector.state().clone();
        detector.update(f64::NAN);
        assert_eq!(detector.state(), &before);
    }

    #[test]
    fn test_cusum_detects_small_persistent_shift() {
        let mut cfg = config(10, 2);
        cfg.statistic = StatisticKind::Cusum;
        cfg.warn_threshold = 3.0;
        cfg.drift_threshold = 5.0;
        let mut detector = warmed(cfg);

        // one sigma shift is invisible to a single z-score but accumulates
        let mut statuses = Vec::new();
        for _ in 0..20 {
            statuses.push(detector.update(0.7).status);
        }
        assert!(statuses.contains(&DriftStatus::Drifting));
    }

    #[test]
    fn test_identical_sequences_are_deterministic() {
        let residuals: Vec<f64> = (0..80)
            .map(|i| if i < 40 { (i as f64).sin() } else { 6.0 + (i as f64).cos() })
            .collect();

        let run = |statistic| {
            let mut cfg = config(10, 3);
            cfg.statistic = statistic;
            let mut detector = DriftDetector::new(cfg);
            residuals
                .iter()
                .map(|r| detector.update(*r).clone())
                .collect::<Vec<_>>()
        };

        for kind in [StatisticKind::ZScore, StatisticKind::Cusum, StatisticKind::Ewma] {
            assert_eq!(run(kind), run(kind));
        }
    }

    proptest! {
        #[test]
        fn prop_residuals_below_warn_stay_stable(
            residuals in prop::collection::vec(-1.5f64..1.5, 1..200)
        ) {
            let mut detector = DriftDetector::new(config(10, 3));
            for i in 0..10 {
                detector.update(if i % 2 == 0 { 1.0 } else { -1.0 });
            }
            // baseline std is sqrt(10/9), so |z| < 2 for every residual
            for r in residuals {
                prop_assert_eq!(detector.update(r).status, DriftStatus::Stable);
            }
        }
    }
}
