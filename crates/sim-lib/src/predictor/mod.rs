//! Demand prediction engine

mod features;
mod linear;

pub use features::Preprocessor;
pub use linear::{FallbackPredictor, LinearPredictor, FALLBACK_VERSION};

use crate::error::Result;
use crate::models::{FeatureVector, Prediction, TrainingSample};

/// Trait for demand prediction implementations
pub trait Predictor: Send {
    /// Forecast next-tick demand per cell.
    ///
    /// Fails with `SimError::ModelUnavailable` until a model has been fitted.
    fn predict(&self, features: &FeatureVector) -> Result<Prediction>;

    /// Fit a new model from historical samples, replacing the current one
    /// only on success
    fn refit(&mut self, history: &[TrainingSample]) -> Result<()>;

    /// Get current model version
    fn model_version(&self) -> &str;

    fn is_trained(&self) -> bool;
}
