//! Record preprocessing
//!
//! Turns a raw metric record into normalized per-cell features. Missing,
//! non-finite and out-of-range values are repaired in place so one bad record
//! never stalls the pipeline.

use crate::config::PreprocessConfig;
use crate::models::{CellFeatures, FeatureVector, MetricRecord};
use std::collections::HashSet;
use tracing::debug;

/// Upper bound of the load scale (percent)
const MAX_LOAD_PERCENT: f64 = 100.0;

/// Upper bound of the error rate scale
const MAX_ERROR_RATE: f64 = 1.0;

/// Normalizes metric records into feature vectors
#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn process(&self, record: &MetricRecord) -> FeatureVector {
        let mut imputed = 0u32;
        let mut seen = HashSet::new();
        let mut cells = Vec::with_capacity(record.cells.len());

        for cell in &record.cells {
            if cell.cell_id.is_empty() || !seen.insert(cell.cell_id.as_str()) {
                imputed += 1;
                continue;
            }

            let observed_demand = clean(cell.load, MAX_LOAD_PERCENT);
            cells.push(CellFeatures {
                cell_id: cell.cell_id.clone(),
                load: self.normalize(cell.load, MAX_LOAD_PERCENT, &mut imputed),
                latency: self.normalize(cell.latency_ms, self.config.max_latency_ms, &mut imputed),
                error_rate: self.normalize(cell.error_rate, MAX_ERROR_RATE, &mut imputed),
                throughput: self.normalize(
                    cell.throughput_mbps,
                    self.config.max_throughput_mbps,
                    &mut imputed,
                ),
                users: self.normalize(
                    cell.active_users,
                    self.config.max_active_users,
                    &mut imputed,
                ),
                observed_demand,
            });
        }

        cells.sort_by(|a, b| a.cell_id.cmp(&b.cell_id));

        if imputed > 0 {
            debug!(tick = record.tick, repaired = imputed, "Repaired malformed metric values");
        }

        FeatureVector {
            tick: record.tick,
            timestamp: record.timestamp,
            cells,
            imputed,
        }
    }

    fn normalize(&self, value: Option<f64>, max: f64, imputed: &mut u32) -> f64 {
        match value {
            Some(v) if v.is_finite() => {
                if v < 0.0 || v > max {
                    *imputed += 1;
                }
                (v / max).clamp(0.0, 1.0)
            }
            _ => {
                *imputed += 1;
                self.config.sentinel
            }
        }
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(PreprocessConfig::default())
    }
}

/// Clip a raw value into `[0, max]`, dropping missing or non-finite input
fn clean(value: Option<f64>, max: f64) -> Option<f64> {
    value.filter(|v| v.is_finite()).map(|v| v.clamp(0.0, max))
}
