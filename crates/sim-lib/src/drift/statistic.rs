//! Drift statistics over prediction residuals
//!
//! Each statistic standardizes the residual against the learned baseline and
//! folds it into a single non-negative score that the detector compares with
//! its warn and drift thresholds.

use crate::config::{DriftConfig, StatisticKind};

/// Residual distribution learned from a window of residuals
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub mean: f64,
    /// Sample standard deviation, floored at the configured minimum
    pub std_dev: f64,
}

impl Baseline {
    /// Learn a baseline from a window of residuals.
    ///
    /// Uses the two-pass sample variance (Bessel's correction).
    pub fn from_samples(samples: &[f64], min_std: f64) -> Self {
        if samples.is_empty() {
            return Self {
                mean: 0.0,
                std_dev: min_std,
            };
        }

        let count = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / count;
        let variance = if samples.len() > 1 {
            samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1.0)
        } else {
            0.0
        };

        Self {
            mean,
            std_dev: variance.sqrt().max(min_std),
        }
    }

    /// Standardized distance of a residual from the baseline mean
    pub fn standardize(&self, residual: f64) -> f64 {
        (residual - self.mean) / self.std_dev
    }

    /// Move the baseline toward a new residual by EWMA with rate `alpha`
    pub fn adapt(&mut self, residual: f64, alpha: f64, min_std: f64) {
        let delta = residual - self.mean;
        self.mean += alpha * delta;
        let variance = (1.0 - alpha) * (self.std_dev.powi(2) + alpha * delta.powi(2));
        self.std_dev = variance.sqrt().max(min_std);
    }
}

/// Output of a statistic for one residual
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftSignal {
    /// Non-negative score compared with the thresholds
    pub value: f64,
    /// Standardized residual the score was derived from
    pub z_score: f64,
}

/// Pluggable drift statistic
pub trait DriftStatistic: Send {
    fn name(&self) -> &'static str;

    /// Fold one residual into the statistic
    fn update(&mut self, residual: f64, baseline: &Baseline) -> DriftSignal;

    /// Forget accumulated state, used after a rebaseline
    fn reset(&mut self);
}

/// Build the statistic selected in the drift configuration
pub fn build_statistic(config: &DriftConfig) -> Box<dyn DriftStatistic> {
    match config.statistic {
        StatisticKind::ZScore => Box::new(ZScore),
        StatisticKind::Cusum => Box::new(Cusum::new(config.cusum_slack)),
        StatisticKind::Ewma => Box::new(Ewma::new(config.ewma_lambda)),
    }
}

/// Absolute standardized deviation of the latest residual
#[derive(Debug, Clone, Copy, Default)]
pub struct ZScore;

impl DriftStatistic for ZScore {
    fn name(&self) -> &'static str {
        "z_score"
    }

    fn update(&mut self, residual: f64, baseline: &Baseline) -> DriftSignal {
        let z_score = baseline.standardize(residual);
        DriftSignal {
            value: z_score.abs(),
            z_score,
        }
    }

    fn reset(&mut self) {}
}

/// Two-sided cumulative sum with slack `k`
#[derive(Debug, Clone)]
pub struct Cusum {
    slack: f64,
    upper: f64,
    lower: f64,
}

impl Cusum {
    pub fn new(slack: f64) -> Self {
        Self {
            slack,
            upper: 0.0,
            lower: 0.0,
        }
    }
}

impl DriftStatistic for Cusum {
    fn name(&self) -> &'static str {
        "cusum"
    }

    fn update(&mut self, residual: f64, baseline: &Baseline) -> DriftSignal {
        let z_score = baseline.standardize(residual);
        self.upper = (self.upper + z_score - self.slack).max(0.0);
        self.lower = (self.lower - z_score - self.slack).max(0.0);
        DriftSignal {
            value: self.upper.max(self.lower),
            z_score,
        }
    }

    fn reset(&mut self) {
        self.upper = 0.0;
        self.lower = 0.0;
    }
}

/// Exponentially weighted mean of standardized residuals, scaled by its
/// asymptotic standard deviation so the thresholds read in sigmas
#[derive(Debug, Clone)]
pub struct Ewma {
    lambda: f64,
    scale: f64,
    level: f64,
}

impl Ewma {
    pub fn new(lambda: f64) -> Self {
        Self {
            lambda,
            scale: (lambda / (2.0 - lambda)).sqrt(),
            level: 0.0,
        }
    }
}

impl DriftStatistic for Ewma {
    fn name(&self) -> &'static str {
        "ewma"
    }

    fn update(&mut self, residual: f64, baseline: &Baseline) -> DriftSignal {
        let z_score = baseline.standardize(residual);
        self.level = self.lambda * z_score + (1.0 - self.lambda) * self.level;
        DriftSignal {
            value: self.level.abs() / self.scale,
            z_score,
        }
    }

    fn reset(&mut self) {
        self.level = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit() -> Baseline {
        Baseline {
            mean: 0.0,
            std_dev: 1.0,
        }
    }

    #[test]
    fn test_baseline_from_samples() {
        let baseline = Baseline::from_samples(&[1.0, 2.0, 3.0, 4.0, 5.0], 1e-3);
        assert_relative_eq!(baseline.mean, 3.0);
        assert_relative_eq!(baseline.std_dev, 2.5f64.sqrt());
    }

    #[test]
    fn test_baseline_std_floor() {
        let baseline = Baseline::from_samples(&[2.0; 8], 0.01);
        assert_relative_eq!(baseline.mean, 2.0);
        assert_relative_eq!(baseline.std_dev, 0.01);
    }

    #[test]
    fn test_baseline_adapt_moves_mean() {
        let mut baseline = unit();
        baseline.adapt(10.0, 0.1, 1e-3);
        assert_relative_eq!(baseline.mean, 1.0);
        assert!(baseline.std_dev > 1.0);
    }

    #[test]
    fn test_zscore_is_absolute() {
        let mut stat = ZScore;
        let signal = stat.update(-4.0, &unit());
        assert_relative_eq!(signal.value, 4.0);
        assert_relative_eq!(signal.z_score, -4.0);
    }

    #[test]
    fn test_cusum_accumulates_and_resets() {
        let mut stat = Cusum::new(0.5);
        let baseline = unit();
        stat.update(1.5, &baseline);
        let signal = stat.update(1.5, &baseline);
        assert_relative_eq!(signal.value, 2.0);

        // downward shifts accumulate on the lower arm
        let mut down = Cusum::new(0.5);
        let signal = down.update(-3.0, &baseline);
        assert_relative_eq!(signal.value, 2.5);

        stat.reset();
        let signal = stat.update(0.0, &baseline);
        assert_relative_eq!(signal.value, 0.0);
    }

    #[test]
    fn test_ewma_normalized_by_asymptotic_std() {
        let mut stat = Ewma::new(1.0);
        // lambda = 1 degenerates to the absolute z-score
        let signal = stat.update(3.0, &unit());
        assert_relative_eq!(signal.value, 3.0);

        let mut smooth = Ewma::new(0.5);
        let signal = smooth.update(2.0, &unit());
        // level 1.0, scale sqrt(0.5 / 1.5)
        assert_relative_eq!(signal.value, 1.0 / (1.0f64 / 3.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_factory_respects_kind() {
        let mut config = DriftConfig::default();
        assert_eq!(build_statistic(&config).name(), "z_score");
        config.statistic = StatisticKind::Cusum;
        assert_eq!(build_statistic(&config).name(), "cusum");
        config.statistic = StatisticKind::Ewma;
        assert_eq!(build_statistic(&config).name(), "ewma");
    }
}
