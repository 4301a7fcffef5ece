//! Seeded synthetic traffic generator
//!
//! The scenario runs through four phases of `phase_length` ticks each and then
//! stays in the last one:
//! 1. baseline traffic
//! 2. data drift: higher load and latency, lower throughput
//! 3. concept drift: latency starts to depend on active users
//! 4. combined drift: lighter load with a new throughput profile

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::MetricSource;
use crate::config::SourceConfig;
use crate::models::{CellMetrics, MetricRecord};

/// Weight of the previous load level in the per-cell AR(1) process
const LOAD_PERSISTENCE: f64 = 0.7;

/// Traffic regime of the synthetic scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficPhase {
    Baseline,
    DataDrift,
    ConceptDrift,
    Combined,
}

impl TrafficPhase {
    /// Phase active at a 1-based tick
    pub fn at(tick: u64, phase_length: u64) -> Self {
        match tick.saturating_sub(1) / phase_length.max(1) {
            0 => TrafficPhase::Baseline,
            1 => TrafficPhase::DataDrift,
            2 => TrafficPhase::ConceptDrift,
            _ => TrafficPhase::Combined,
        }
    }

    /// Load range in percent of resource blocks
    fn load_range(&self) -> (f64, f64) {
        match self {
            TrafficPhase::Baseline => (10.0, 90.0),
            TrafficPhase::DataDrift => (30.0, 95.0),
            TrafficPhase::ConceptDrift => (20.0, 80.0),
            TrafficPhase::Combined => (5.0, 60.0),
        }
    }

    fn users_range(&self) -> (f64, f64) {
        match self {
            TrafficPhase::Baseline => (50.0, 500.0),
            TrafficPhase::DataDrift => (100.0, 600.0),
            TrafficPhase::ConceptDrift => (150.0, 700.0),
            TrafficPhase::Combined => (20.0, 300.0),
        }
    }

    fn throughput_range(&self) -> (f64, f64) {
        match self {
            TrafficPhase::Baseline => (10.0, 500.0),
            TrafficPhase::DataDrift => (5.0, 200.0),
            TrafficPhase::ConceptDrift => (20.0, 400.0),
            TrafficPhase::Combined => (150.0, 650.0),
        }
    }
}

/// Deterministic multi-cell traffic generator
pub struct SyntheticSource {
    config: SourceConfig,
    rng: StdRng,
    tick: u64,
    limit: Option<u64>,
    /// Current load level per cell
    levels: Vec<f64>,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        let levels = vec![50.0; config.cells];
        Self {
            config,
            rng,
            tick: 0,
            limit: None,
            levels,
        }
    }

    /// Stop after `limit` records
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn phase(&self) -> TrafficPhase {
        TrafficPhase::at(self.tick.max(1), self.config.phase_length)
    }

    fn draw(&mut self, (low, high): (f64, f64)) -> f64 {
        self.rng.gen_range(low..high)
    }

    /// Drop the value with probability `missing_rate`
    fn maybe(&mut self, value: f64) -> Option<f64> {
        if self.config.missing_rate > 0.0 && self.rng.gen_bool(self.config.missing_rate) {
            None
        } else {
            Some(value)
        }
    }

    fn generate_cell(&mut self, index: usize, phase: TrafficPhase) -> CellMetrics {
        let target = self.draw(phase.load_range());
        let load = LOAD_PERSISTENCE * self.levels[index] + (1.0 - LOAD_PERSISTENCE) * target;
        self.levels[index] = load;

        let users = self.draw(phase.users_range()).round();
        let latency = match phase {
            TrafficPhase::Baseline => self.draw((5.0, 50.0)),
            TrafficPhase::DataDrift => self.draw((20.0, 80.0)),
            TrafficPhase::ConceptDrift => self.draw((10.0, 40.0)) + users / 10.0,
            TrafficPhase::Combined => self.draw((15.0, 65.0)),
        };
        let throughput = self.draw(phase.throughput_range());
        let error_rate = (load / 100.0) * self.draw((0.0, 0.05));

        CellMetrics {
            cell_id: format!("Cell-{}", index + 1),
            load: self.maybe(round2(load)),
            latency_ms: self.maybe(round2(latency)),
            error_rate: self.maybe(error_rate),
            throughput_mbps: self.maybe(round2(throughput)),
            active_users: self.maybe(users),
        }
    }
}

impl MetricSource for SyntheticSource {
    fn next_record(&mut self) -> Option<MetricRecord> {
        if self.limit.is_some_and(|limit| self.tick >= limit) {
            return None;
        }

        self.tick += 1;
        let phase = TrafficPhase::at(self.tick, self.config.phase_length);
        let cells = (0..self.config.cells)
            .map(|index| self.generate_cell(index, phase))
            .collect();

        Some(MetricRecord {
            tick: self.tick,
            timestamp: self.config.start_timestamp
                + (self.tick as i64 - 1) * self.config.tick_seconds,
            cells,
        })
    }

    fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.config.seed);
        self.tick = 0;
        self.levels = vec![50.0; self.config.cells];
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn max_cells(&self) -> Option<usize> {
        Some(self.config.cells)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
