//! Observability for simulation runs
//!
//! Provides:
//! - Prometheus metrics (tick latency, drift status, feature PSI, alerts, drops)
//! - Structured JSON logging of run-level domain events

use prometheus::{
    register_gauge, register_gauge_vec, register_histogram, register_int_counter,
    register_int_counter_vec, register_int_gauge, Encoder, Gauge, GaugeVec, Histogram,
    IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::models::DriftStatus;

/// Buckets for per-tick processing time (in seconds)
const TICK_LATENCY_BUCKETS: &[f64] = &[
    0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5,
];

/// Registered once per process
static GLOBAL_METRICS: OnceLock<SimMetricsInner> = OnceLock::new();

struct SimMetricsInner {
    tick_latency_seconds: Histogram,
    ticks_processed: IntCounter,
    ticks_skipped: IntCounter,
    alerts_raised: IntCounterVec,
    drift_status: IntGauge,
    drift_statistic: Gauge,
    feature_psi: GaugeVec,
    rebaselines: IntCounter,
    data_quality_repairs: IntCounter,
    fallback_predictions: IntCounter,
    refit_failures: IntCounter,
    dropped_events: IntCounter,
    model_version_info: GaugeVec,
}

impl SimMetricsInner {
    fn new() -> Self {
        Self {
            tick_latency_seconds: register_histogram!(
                "ran_sim_tick_latency_seconds",
                "Time spent processing one tick through the pipeline",
                TICK_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_latency_seconds"),

            ticks_processed: register_int_counter!(
                "ran_sim_ticks_processed_total",
                "Ticks that produced an allocation plan"
            )
            .expect("Failed to register ticks_processed"),

            ticks_skipped: register_int_counter!(
                "ran_sim_ticks_skipped_total",
                "Ticks dropped because no model was available"
            )
            .expect("Failed to register ticks_skipped"),

            alerts_raised: register_int_counter_vec!(
                "ran_sim_alerts_raised_total",
                "Drift alerts raised, by severity",
                &["severity"]
            )
            .expect("Failed to register alerts_raised"),

            drift_status: register_int_gauge!(
                "ran_sim_drift_status",
                "Current drift status (0 stable, 1 warning, 2 drifting)"
            )
            .expect("Failed to register drift_status"),

            drift_statistic: register_gauge!(
                "ran_sim_drift_statistic",
                "Latest value of the residual drift statistic"
            )
            .expect("Failed to register drift_statistic"),

            feature_psi: register_gauge_vec!(
                "ran_sim_feature_psi",
                "Latest population stability index per input feature",
                &["feature"]
            )
            .expect("Failed to register feature_psi"),

            rebaselines: register_int_counter!(
                "ran_sim_rebaselines_total",
                "Residual baselines re-learned after confirmed drift"
            )
            .expect("Failed to register rebaselines"),

            data_quality_repairs: register_int_counter!(
                "ran_sim_data_quality_repairs_total",
                "Metric values clipped or imputed by the preprocessor"
            )
            .expect("Failed to register data_quality_repairs"),

            fallback_predictions: register_int_counter!(
                "ran_sim_fallback_predictions_total",
                "Predictions served by the persistence fallback"
            )
            .expect("Failed to register fallback_predictions"),

            refit_failures: register_int_counter!(
                "ran_sim_refit_failures_total",
                "Model refits that kept the previous model"
            )
            .expect("Failed to register refit_failures"),

            dropped_events: register_int_counter!(
                "ran_sim_dropped_events_total",
                "Tick events lost by lagging visualization sinks"
            )
            .expect("Failed to register dropped_events"),

            model_version_info: register_gauge_vec!(
                "ran_sim_model_version_info",
                "Demand model currently serving predictions",
                &["version"]
            )
            .expect("Failed to register model_version_info"),
        }
    }
}

/// Handle to the process-wide simulation metrics.
///
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct SimMetrics {
    _private: (),
}

impl Default for SimMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SimMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SimMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SimMetricsInner {
        GLOBAL_METRICS.get_or_init(SimMetricsInner::new)
    }

    pub fn observe_tick_latency(&self, duration_secs: f64) {
        self.inner().tick_latency_seconds.observe(duration_secs);
    }

    pub fn inc_ticks_processed(&self) {
        self.inner().ticks_processed.inc();
    }

    pub fn inc_ticks_skipped(&self) {
        self.inner().ticks_skipped.inc();
    }

    pub fn inc_alerts(&self, severity: &str) {
        self.inner()
            .alerts_raised
            .with_label_values(&[severity])
            .inc();
    }

    pub fn set_drift(&self, status: DriftStatus, statistic: Option<f64>) {
        self.inner().drift_status.set(status.level() as i64);
        self.inner().drift_statistic.set(statistic.unwrap_or(0.0));
    }

    pub fn set_feature_psi(&self, feature: &str, psi: f64) {
        self.inner()
            .feature_psi
            .with_label_values(&[feature])
            .set(psi);
    }

    pub fn inc_rebaselines(&self) {
        self.inner().rebaselines.inc();
    }

    pub fn add_data_quality_repairs(&self, count: u64) {
        self.inner().data_quality_repairs.inc_by(count);
    }

    pub fn inc_fallback_predictions(&self) {
        self.inner().fallback_predictions.inc();
    }

    pub fn inc_refit_failures(&self) {
        self.inner().refit_failures.inc();
    }

    pub fn add_dropped_events(&self, count: u64) {
        self.inner().dropped_events.inc_by(count);
    }

    /// Replace the reported model version
    pub fn set_model_version(&self, version: &str) {
        self.inner().model_version_info.reset();
        self.inner()
            .model_version_info
            .with_label_values(&[version])
            .set(1.0);
    }

    /// Render every registered metric in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Logs run-level domain events with consistent fields
#[derive(Clone)]
pub struct StructuredLogger {
    run_id: String,
}

impl StructuredLogger {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn log_simulation_started(&self, source: &str, cells: usize, statistic: &str) {
        info!(
            event = "simulation_started",
            run = %self.run_id,
            source = %source,
            cells,
            statistic = %statistic,
            "Simulation started"
        );
    }

    pub fn log_drift_transition(
        &self,
        tick: u64,
        from: DriftStatus,
        to: DriftStatus,
        statistic: Option<f64>,
    ) {
        if to.level() > from.level() {
            warn!(
                event = "drift_transition",
                run = %self.run_id,
                tick,
                from = %from,
                to = %to,
                statistic = ?statistic,
                "Drift status escalated"
            );
        } else {
            info!(
                event = "drift_transition",
                run = %self.run_id,
                tick,
                from = %from,
                to = %to,
                statistic = ?statistic,
                "Drift status relaxed"
            );
        }
    }

    pub fn log_alert(&self, id: u64, tick: u64, severity: &str, kind: &str, message: &str) {
        match severity {
            "critical" => warn!(
                event = "alert_raised",
                run = %self.run_id,
                alert_id = id,
                tick,
                severity = %severity,
                kind = %kind,
                message = %message,
                "Critical drift alert"
            ),
            _ => info!(
                event = "alert_raised",
                run = %self.run_id,
                alert_id = id,
                tick,
                severity = %severity,
                kind = %kind,
                message = %message,
                "Drift alert"
            ),
        }
    }

    pub fn log_model_refit(&self, tick: u64, old_version: &str, new_version: &str, success: bool) {
        if success {
            info!(
                event = "model_refit",
                run = %self.run_id,
                tick,
                old_version = %old_version,
                new_version = %new_version,
                "Demand model refitted"
            );
        } else {
            warn!(
                event = "model_refit",
                run = %self.run_id,
                tick,
                old_version = %old_version,
                "Demand model refit failed, keeping previous model"
            );
        }
    }

    pub fn log_allocation_smoothed(&self, tick: u64, alpha: f64) {
        info!(
            event = "allocation_smoothed",
            run = %self.run_id,
            tick,
            alpha,
            "Allocation blended with previous plan during drift"
        );
    }

    pub fn log_simulation_finished(&self, ticks: u64, alerts: usize, reason: &str) {
        info!(
            event = "simulation_finished",
            run = %self.run_id,
            ticks,
            alerts,
            reason = %reason,
            "Simulation finished"
        );
    }
}
