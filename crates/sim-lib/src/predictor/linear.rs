//! Linear demand model
//!
//! Ridge-regularised least squares over the normalized cell features, fitted
//! from (features at t, demand at t+1) samples. A naive persistence predictor
//! covers the period before the first successful fit.

use super::Predictor;
use crate::error::{Result, SimError};
use crate::models::{CellPrediction, FeatureVector, Prediction, TrainingSample, NUM_FEATURES};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

/// Model version reported by the persistence predictor
pub const FALLBACK_VERSION: &str = "fallback";

/// Weights per feature plus the bias term
const NUM_WEIGHTS: usize = NUM_FEATURES + 1;

/// Demand is expressed in load percent
const MAX_DEMAND: f64 = 100.0;

/// Linear regression predictor refitted by the orchestrator
pub struct LinearPredictor {
    weights: Option<[f64; NUM_WEIGHTS]>,
    version: String,
    refits: u32,
    ridge_lambda: f64,
    min_samples: usize,
}

impl LinearPredictor {
    /// Create an untrained predictor
    pub fn new(ridge_lambda: f64, min_samples: usize) -> Self {
        Self {
            weights: None,
            version: "untrained".to_string(),
            refits: 0,
            ridge_lambda,
            min_samples: min_samples.max(1),
        }
    }

    /// Create a predictor with known weights (last entry is the bias)
    pub fn with_weights(weights: [f64; NUM_WEIGHTS]) -> Self {
        Self {
            weights: Some(weights),
            version: "linear-v0".to_string(),
            refits: 0,
            ridge_lambda: 0.0,
            min_samples: 1,
        }
    }

    pub fn weights(&self) -> Option<&[f64; NUM_WEIGHTS]> {
        self.weights.as_ref()
    }

    /// Solve `(X'X + lambda*I') w = X'y`, where `I'` leaves the trailing
    /// bias column unpenalized
    fn solve_ridge(&self, samples: &[&TrainingSample]) -> Result<[f64; NUM_WEIGHTS]> {
        let design = DMatrix::<f64>::from_fn(samples.len(), NUM_WEIGHTS, |row, col| {
            if col < NUM_FEATURES {
                samples[row].features[col]
            } else {
                1.0
            }
        });
        let targets = DVector::<f64>::from_iterator(samples.len(), samples.iter().map(|s| s.target));

        let mut penalty = DMatrix::<f64>::identity(NUM_WEIGHTS, NUM_WEIGHTS) * self.ridge_lambda;
        penalty[(NUM_FEATURES, NUM_FEATURES)] = 0.0;

        let gram = design.transpose() * &design + penalty;
        let moments = design.transpose() * targets;

        let solution = gram
            .lu()
            .solve(&moments)
            .filter(|w| w.iter().all(|v| v.is_finite()))
            .ok_or_else(|| SimError::Training("normal equations are singular".to_string()))?;

        let mut weights = [0.0f64; NUM_WEIGHTS];
        for (slot, value) in weights.iter_mut().zip(solution.iter()) {
            *slot = *value;
        }
        Ok(weights)
    }

    fn evaluate(weights: &[f64; NUM_WEIGHTS], features: &[f64; NUM_FEATURES]) -> f64 {
        let linear: f64 = features
            .iter()
            .zip(weights.iter())
            .map(|(x, w)| x * w)
            .sum();
        (linear + weights[NUM_FEATURES]).clamp(0.0, MAX_DEMAND)
    }
}

impl Predictor for LinearPredictor {
    fn predict(&self, features: &FeatureVector) -> Result<Prediction> {
        let weights = self.weights.as_ref().ok_or(SimError::ModelUnavailable)?;

        let cells = features
            .cells
            .iter()
            .map(|cell| CellPrediction {
                cell_id: cell.cell_id.clone(),
                demand: Self::evaluate(weights, &cell.as_array()),
            })
            .collect();

        Ok(Prediction {
            tick: features.tick,
            target_tick: features.tick + 1,
            timestamp: features.timestamp,
            cells,
            model_version: self.version.clone(),
            fallback: false,
        })
    }

    fn refit(&mut self, history: &[TrainingSample]) -> Result<()> {
        let samples: Vec<&TrainingSample> = history
            .iter()
            .filter(|s| s.target.is_finite() && s.features.iter().all(|f| f.is_finite()))
            .collect();

        if samples.len() < self.min_samples {
            return Err(SimError::Training(format!(
                "{} usable samples, need {}",
                samples.len(),
                self.min_samples
            )));
        }

        let weights = self.solve_ridge(&samples)?;

        self.weights = Some(weights);
        self.refits += 1;
        self.version = format!("linear-v{}", self.refits);

        debug!(
            version = %self.version,
            samples = samples.len(),
            "Demand model refitted"
        );
        Ok(())
    }

    fn model_version(&self) -> &str {
        &self.version
    }

    fn is_trained(&self) -> bool {
        self.weights.is_some()
    }
}

/// Naive persistence predictor used when no model is available
pub struct FallbackPredictor;

impl FallbackPredictor {
    /// Predict that every cell keeps its last observed load
    pub fn predict(features: &FeatureVector) -> Prediction {
        let cells = features
            .cells
            .iter()
            .map(|cell| CellPrediction {
                cell_id: cell.cell_id.clone(),
                demand: cell
                    .observed_demand
                    .unwrap_or(cell.load * MAX_DEMAND)
                    .clamp(0.0, MAX_DEMAND),
            })
            .collect();

        Prediction {
            tick: features.tick,
            target_tick: features.tick + 1,
            timestamp: features.timestamp,
            cells,
            model_version: FALLBACK_VERSION.to_string(),
            fallback: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CellFeatures;

    fn features(cells: Vec<(&str, f64)>) -> FeatureVector {
        FeatureVector {
            tick: 4,
            timestamp: 1_700_000_004,
            cells: cells
                .into_iter()
                .map(|(id, load)| CellFeatures {
                    cell_id: id.to_string(),
                    load,
                    latency: 0.2,
                    error_rate: 0.0,
                    throughput: 0.3,
                    users: 0.4,
                    observed_demand: Some(load * 100.0),
                })
                .collect(),
            imputed: 0,
        }
    }

    #[test]
    fn test_untrained_model_unavailable() {
        let predictor = LinearPredictor::new(1e-3, 10);
        let err = predictor.predict(&features(vec![("a", 0.5)])).unwrap_err();
        assert!(matches!(err, SimError::ModelUnavailable));
        assert!(!predictor.is_trained());
    }

    #[test]
    fn test_refit_recovers_linear_relationship() {
        // demand = 80 * load + 10
        let history: Vec<TrainingSample> = (0..60)
            .map(|i| {
                let load = (i % 20) as f64 / 20.0;
                let latency = ((i * 7) % 11) as f64 / 11.0;
                let throughput = ((i * 3) % 13) as f64 / 13.0;
                let users = ((i * 5) % 17) as f64 / 17.0;
                TrainingSample {
                    features: [load, latency, 0.0, throughput, users],
                    target: 80.0 * load + 10.0,
                }
            })
            .collect();

        let mut predictor = LinearPredictor::new(1e-6, 10);
        predictor.refit(&history).unwrap();

        assert!(predictor.is_trained());
        assert_eq!(predictor.model_version(), "linear-v1");

        let prediction = predictor.predict(&features(vec![("a", 0.5)])).unwrap();
        assert!((prediction.demand("a").unwrap() - 50.0).abs() < 0.5);
        assert_eq!(prediction.target_tick, 5);
        assert!(!prediction.fallback);
    }

    #[test]
    fn test_refit_rejects_short_history() {
        let mut predictor = LinearPredictor::new(1e-3, 10);
        let history = vec![
            TrainingSample {
                features: [0.1; NUM_FEATURES],
                target: 10.0,
            };
            3
        ];
        assert!(matches!(
            predictor.refit(&history),
            Err(SimError::Training(_))
        ));
        assert!(!predictor.is_trained());
    }

    #[test]
    fn test_version_increments_per_refit() {
        let history: Vec<TrainingSample> = (0..30)
            .map(|i| TrainingSample {
                features: [i as f64 / 30.0, 0.1, 0.2, 0.3, 0.4],
                target: i as f64,
            })
            .collect();
        let mut predictor = LinearPredictor::new(1e-2, 5);
        predictor.refit(&history).unwrap();
        predictor.refit(&history).unwrap();
        assert_eq!(predictor.model_version(), "linear-v2");
    }

    #[test]
    fn test_predictions_clamped() {
        let predictor = LinearPredictor::with_weights([500.0, 0.0, 0.0, 0.0, 0.0, -10.0]);
        let prediction = predictor
            .predict(&features(vec![("hot", 1.0), ("cold", 0.0)]))
            .unwrap();
        assert_eq!(prediction.demand("hot"), Some(100.0));
        assert_eq!(prediction.demand("cold"), Some(0.0));
    }

    #[test]
    fn test_fallback_persists_last_load() {
        let prediction = FallbackPredictor::predict(&features(vec![("a", 0.7), ("b", 0.2)]));
        assert!(prediction.fallback);
        assert_eq!(prediction.model_version, FALLBACK_VERSION);
        assert!((prediction.demand("a").unwrap() - 70.0).abs() < 1e-9);
        assert!((prediction.demand("b").unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_singular_history_keeps_previous_model() {
        let mut predictor = LinearPredictor::new(0.0, 5);
        let flat = vec![
            TrainingSample {
                features: [0.0; NUM_FEATURES],
                target: 40.0,
            };
            10
        ];
        let err = predictor.refit(&flat).unwrap_err();
        assert!(matches!(err, SimError::Training(_)));
        assert!(!predictor.is_trained());
        assert_eq!(predictor.model_version(), "untrained");
    }

    #[test]
    fn test_ridge_penalty_leaves_bias_free() {
        // constant target with uninformative features: the bias absorbs it
        let history: Vec<TrainingSample> = (0..40)
            .map(|i| TrainingSample {
                features: [(i % 5) as f64 / 5.0, 0.0, 0.0, 0.0, 0.0],
                target: 35.0,
            })
            .collect();
        let mut predictor = LinearPredictor::new(10.0, 5);
        predictor.refit(&history).unwrap();

        let weights = predictor.weights().unwrap();
        assert!(weights[0].abs() < 1e-6);
        assert!((weights[NUM_FEATURES] - 35.0).abs() < 1e-6);
    }
}
