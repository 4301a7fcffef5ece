//! Error taxonomy for the simulation pipeline

use thiserror::Error;

/// Errors surfaced by pipeline components.
///
/// Repairable data quality problems are fixed by the preprocessor and never
/// show up here. Drift is a status value, not an error.
#[derive(Debug, Error)]
pub enum SimError {
    /// The predictor has not been fitted yet
    #[error("no trained model is available")]
    ModelUnavailable,

    /// Invalid capacity, thresholds or other static settings. Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Refit could not produce a model from the supplied history
    #[error("model training failed: {0}")]
    Training(String),

    /// The metric source could not produce or load records
    #[error("metric source error: {0}")]
    Source(String),

    /// A single record could not be processed and was dropped
    #[error("record rejected: {0}")]
    RejectedRecord(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    /// Shorthand for building a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        SimError::Configuration(message.into())
    }

    /// Whether the simulation must stop when this error is returned
    pub fn is_fatal(&self) -> bool {
        matches!(self, SimError::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
