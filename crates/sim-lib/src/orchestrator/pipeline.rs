//! Synchronous per-tick pipeline
//!
//! One call to [`Pipeline::step`] processes one record end to end:
//! preprocess, score the pending prediction, update residual and input drift
//! and their alerts, predict the next tick and allocate. All cross-tick state lives here, so a
//! fresh pipeline fed the same records produces the same events.

use std::collections::VecDeque;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::allocator::Allocator;
use crate::config::{SimulationConfig, UnavailablePolicy};
use crate::drift::{AlertEvent, AlertManager, DataDriftMonitor, DriftDetector, FEATURE_NAMES};
use crate::error::{Result, SimError};
use crate::models::{
    AllocationPlan, DriftState, DriftStatus, FeatureVector, MetricRecord, Prediction,
    TrainingSample, NUM_FEATURES,
};
use crate::observability::{SimMetrics, StructuredLogger};
use crate::predictor::{FallbackPredictor, LinearPredictor, Predictor, Preprocessor};

/// Everything the visualizer needs about one processed tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickEvent {
    pub tick: u64,
    pub timestamp: i64,
    /// Mean observed-minus-predicted demand, absent until a prediction exists
    pub residual: Option<f64>,
    /// Values repaired by the preprocessor
    pub imputed: u32,
    /// Forecast for the next tick
    pub prediction: Prediction,
    pub drift: DriftState,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub alert: Option<AlertEvent>,
    /// Input features whose PSI crossed the threshold on this tick
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub data_alerts: Vec<AlertEvent>,
    pub plan: AllocationPlan,
}

/// Counters accumulated over a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub ticks: u64,
    pub events: u64,
    pub skipped_ticks: u64,
    pub fallback_predictions: u64,
    pub refits: u64,
    pub refit_failures: u64,
    pub repaired_values: u64,
    pub rejected_records: u64,
}

/// Owns every component and all mutable state of a single run
pub struct Pipeline {
    config: SimulationConfig,
    preprocessor: Preprocessor,
    predictor: Box<dyn Predictor>,
    detector: DriftDetector,
    data_drift: DataDriftMonitor,
    alerts: AlertManager,
    allocator: Allocator,
    /// Prediction made on the previous tick for the next record
    pending: Option<Prediction>,
    last_features: Option<FeatureVector>,
    history: VecDeque<TrainingSample>,
    previous_plan: Option<AllocationPlan>,
    last_status: DriftStatus,
    last_rebaselines: u32,
    stats: PipelineStats,
    logger: StructuredLogger,
    metrics: SimMetrics,
}

impl Pipeline {
    /// Build a pipeline with the linear demand model
    pub fn new(config: SimulationConfig) -> Result<Self> {
        let predictor = LinearPredictor::new(
            config.predictor.ridge_lambda,
            config.predictor.min_training_samples,
        );
        Self::with_predictor(config, Box::new(predictor))
    }

    /// Build a pipeline around a custom predictor
    pub fn with_predictor(config: SimulationConfig, predictor: Box<dyn Predictor>) -> Result<Self> {
        config.validate()?;

        let allocator = Allocator::new(config.allocator.clone())?;
        let logger = StructuredLogger::new(config.orchestrator.run_id.clone());
        let metrics = SimMetrics::new();
        metrics.set_model_version(predictor.model_version());

        Ok(Self {
            preprocessor: Preprocessor::new(config.preprocess.clone()),
            detector: DriftDetector::new(config.drift.clone()),
            data_drift: DataDriftMonitor::new(config.data_drift.clone()),
            alerts: AlertManager::new(config.orchestrator.run_id.clone()),
            history: VecDeque::with_capacity(config.predictor.history_capacity.min(4096)),
            predictor,
            allocator,
            pending: None,
            last_features: None,
            previous_plan: None,
            last_status: DriftStatus::Stable,
            last_rebaselines: 0,
            stats: PipelineStats::default(),
            logger,
            metrics,
            config,
        })
    }

    /// Process one record.
    ///
    /// Returns `Ok(None)` when the tick is skipped because no model is
    /// available and the policy says to skip. A record carrying more cells
    /// than the capacity can floor is rejected before any state changes.
    pub fn step(&mut self, record: MetricRecord) -> Result<Option<TickEvent>> {
        let started = Instant::now();

        let features = self.preprocessor.process(&record);
        if let Err(e) = self
            .allocator
            .config()
            .validate_for_cells(features.cells.len())
        {
            self.stats.rejected_records += 1;
            warn!(
                tick = record.tick,
                cells = features.cells.len(),
                "Dropping record that exceeds allocator capacity"
            );
            return Err(SimError::RejectedRecord(e.to_string()));
        }

        self.stats.ticks += 1;
        if features.imputed > 0 {
            self.stats.repaired_values += features.imputed as u64;
            self.metrics.add_data_quality_repairs(features.imputed as u64);
        }

        let residual = self
            .pending
            .as_ref()
            .and_then(|pending| mean_residual(pending, &features));
        self.collect_training_samples(&features);

        if let Some(residual) = residual {
            self.detector.update(residual);
        }
        let drift = self.detector.state().clone();
        self.track_drift(&drift, record.tick);

        let alert = self.alerts.on_drift_state(&drift, record.tick, record.timestamp);
        if let Some(event) = &alert {
            self.report_alert(event);
        }

        let mut data_alerts = Vec::new();
        for finding in self.data_drift.observe(&features) {
            let event = self
                .alerts
                .on_data_drift(finding, &drift, record.tick, record.timestamp);
            self.report_alert(&event);
            data_alerts.push(event);
        }
        if let Some(scores) = self.data_drift.scores() {
            for (feature, psi) in FEATURE_NAMES.iter().zip(scores) {
                self.metrics.set_feature_psi(feature, psi);
            }
        }

        if self.stats.ticks % self.config.predictor.retrain_every == 0 {
            self.refit(record.tick);
        }

        let prediction = match self.predictor.predict(&features) {
            Ok(prediction) => prediction,
            Err(SimError::ModelUnavailable) => match self.config.predictor.unavailable_policy {
                UnavailablePolicy::Fallback => {
                    self.stats.fallback_predictions += 1;
                    self.metrics.inc_fallback_predictions();
                    FallbackPredictor::predict(&features)
                }
                UnavailablePolicy::Skip => {
                    debug!(tick = record.tick, "No trained model, skipping tick");
                    self.stats.skipped_ticks += 1;
                    self.metrics.inc_ticks_skipped();
                    self.pending = None;
                    self.last_features = Some(features);
                    return Ok(None);
                }
            },
            Err(e) => return Err(e),
        };

        let plan = self
            .allocator
            .allocate(&prediction, &drift, self.previous_plan.as_ref())?;
        if plan.smoothed {
            self.logger
                .log_allocation_smoothed(record.tick, self.allocator.config().smoothing);
        }

        self.previous_plan = Some(plan.clone());
        self.pending = Some(prediction.clone());
        self.last_features = Some(features.clone());
        self.stats.events += 1;

        self.metrics.inc_ticks_processed();
        self.metrics
            .observe_tick_latency(started.elapsed().as_secs_f64());

        Ok(Some(TickEvent {
            tick: record.tick,
            timestamp: record.timestamp,
            residual,
            imputed: features.imputed,
            prediction,
            drift,
            alert,
            data_alerts,
            plan,
        }))
    }

    fn report_alert(&self, event: &AlertEvent) {
        let severity = event.severity.to_string();
        self.metrics.inc_alerts(&severity);
        self.logger.log_alert(
            event.id,
            event.tick,
            &severity,
            &event.kind.to_string(),
            &event.message,
        );
    }

    /// Fit a new model from the training history, keeping the current one on
    /// failure
    pub fn refit(&mut self, tick: u64) {
        let old_version = self.predictor.model_version().to_string();
        let samples: Vec<TrainingSample> = self.history.iter().cloned().collect();

        match self.predictor.refit(&samples) {
            Ok(()) => {
                self.stats.refits += 1;
                let new_version = self.predictor.model_version().to_string();
                self.metrics.set_model_version(&new_version);
                self.logger
                    .log_model_refit(tick, &old_version, &new_version, true);
            }
            Err(e) => {
                self.stats.refit_failures += 1;
                self.metrics.inc_refit_failures();
                warn!(tick, error = %e, "Refit failed");
                self.logger
                    .log_model_refit(tick, &old_version, &old_version, false);
            }
        }
    }

    /// Re-learn the drift baseline from the most recent residuals
    pub fn rebaseline(&mut self) -> bool {
        self.detector.rebaseline()
    }

    pub fn drift_state(&self) -> &DriftState {
        self.detector.state()
    }

    pub fn alert_history(&self) -> &[AlertEvent] {
        self.alerts.history()
    }

    /// Latest PSI per input feature, once the data drift windows are full
    pub fn feature_psi(&self) -> Option<[f64; NUM_FEATURES]> {
        self.data_drift.scores()
    }

    pub fn model_version(&self) -> &str {
        self.predictor.model_version()
    }

    pub fn is_trained(&self) -> bool {
        self.predictor.is_trained()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn training_samples(&self) -> usize {
        self.history.len()
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn statistic_name(&self) -> &'static str {
        self.detector.statistic_name()
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Pair the previous tick's features with this tick's observed demand
    fn collect_training_samples(&mut self, features: &FeatureVector) {
        let Some(previous) = self.last_features.as_ref() else {
            return;
        };

        let capacity = self.config.predictor.history_capacity;
        for cell in &previous.cells {
            let Some(target) = features.cell(&cell.cell_id).and_then(|c| c.observed_demand)
            else {
                continue;
            };
            if self.history.len() == capacity {
                self.history.pop_front();
            }
            self.history.push_back(TrainingSample {
                features: cell.as_array(),
                target,
            });
        }
    }

    fn track_drift(&mut self, drift: &DriftState, tick: u64) {
        self.metrics.set_drift(drift.status, drift.statistic);

        if drift.status != self.last_status {
            self.logger
                .log_drift_transition(tick, self.last_status, drift.status, drift.statistic);
            self.last_status = drift.status;
        }
        if drift.rebaselines > self.last_rebaselines {
            self.metrics.inc_rebaselines();
            self.last_rebaselines = drift.rebaselines;
        }
    }
}

/// Mean over cells of observed minus predicted demand; cells lacking either
/// value are skipped
fn mean_residual(prediction: &Prediction, features: &FeatureVector) -> Option<f64> {
    let residuals: Vec<f64> = prediction
        .cells
        .iter()
        .filter_map(|p| {
            let observed = features.cell(&p.cell_id)?.observed_demand?;
            Some(observed - p.demand)
        })
        .collect();

    if residuals.is_empty() {
        None
    } else {
        Some(residuals.iter().sum::<f64>() / residuals.len() as f64)
    }
}

/// Run a fresh pipeline over a finite corpus and collect its events
pub fn simulate(
    config: SimulationConfig,
    records: impl IntoIterator<Item = MetricRecord>,
) -> Result<Vec<TickEvent>> {
    let mut pipeline = Pipeline::new(config)?;
    let mut events = Vec::new();
    for record in records {
        match pipeline.step(record) {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(error = %e, "Record dropped"),
        }
    }
    Ok(events)
}
