//! Visualization sinks
//!
//! Sinks consume the tick event stream on their own tasks. A sink that falls
//! behind loses the oldest events; the decision loop never waits for it.
//! Alerts also travel on an unbounded feed, so the alert history is complete
//! even when tick events were dropped.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};

use super::TickEvent;
use crate::drift::AlertEvent;
use crate::error::Result;
use crate::models::{AllocationPlan, DriftState, DriftStatus};
use crate::observability::SimMetrics;

/// Consumer of tick events
#[async_trait]
pub trait EventSink: Send {
    fn name(&self) -> &'static str;

    async fn handle(&mut self, event: &TickEvent) -> Result<()>;

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes one JSON line per tick event
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<tokio::fs::File>,
}

impl JsonLinesSink {
    /// Create (or truncate) the artifact file
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::File::create(&path).await?;
        info!(path = %path.display(), "Writing tick events");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventSink for JsonLinesSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    async fn handle(&mut self, event: &TickEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// One point of the drift timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftPoint {
    pub tick: u64,
    pub status: DriftStatus,
    pub statistic: Option<f64>,
    pub residual: Option<f64>,
}

/// Latest view of the run, served by the status endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationStatus {
    pub run_id: String,
    pub tick: u64,
    pub drift_status: DriftStatus,
    pub model_version: String,
    pub fallback: bool,
    pub cells: usize,
    pub events_seen: u64,
    pub alerts_raised: usize,
    pub last_alert: Option<AlertEvent>,
}

/// Drift state plus recent timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftSnapshot {
    pub state: DriftState,
    pub timeline: Vec<DriftPoint>,
}

#[derive(Debug, Default)]
struct HistoryInner {
    events_seen: u64,
    latest: Option<TickEvent>,
    plans: VecDeque<AllocationPlan>,
    timeline: VecDeque<DriftPoint>,
    /// Keyed by alert id, so both delivery paths merge without duplicates
    alerts: BTreeMap<u64, AlertEvent>,
}

/// Bounded in-memory history of the event stream
#[derive(Debug, Clone)]
pub struct HistoryStore {
    run_id: String,
    limit: usize,
    inner: Arc<RwLock<HistoryInner>>,
}

impl HistoryStore {
    pub fn new(run_id: impl Into<String>, limit: usize) -> Self {
        Self {
            run_id: run_id.into(),
            limit: limit.max(1),
            inner: Arc::new(RwLock::new(HistoryInner::default())),
        }
    }

    pub async fn record(&self, event: &TickEvent) {
        let mut inner = self.inner.write().await;
        inner.events_seen += 1;

        if inner.plans.len() == self.limit {
            inner.plans.pop_front();
        }
        inner.plans.push_back(event.plan.clone());

        if inner.timeline.len() == self.limit {
            inner.timeline.pop_front();
        }
        inner.timeline.push_back(DriftPoint {
            tick: event.tick,
            status: event.drift.status,
            statistic: event.drift.statistic,
            residual: event.residual,
        });

        for alert in event.alert.iter().chain(&event.data_alerts) {
            inner.alerts.insert(alert.id, alert.clone());
        }
        inner.latest = Some(event.clone());
    }

    pub async fn record_alert(&self, alert: AlertEvent) {
        self.inner.write().await.alerts.insert(alert.id, alert);
    }

    /// Store every alert from the orchestrator's alert feed until it closes
    pub async fn follow_alerts(self, mut alerts: mpsc::UnboundedReceiver<AlertEvent>) {
        while let Some(alert) = alerts.recv().await {
            self.record_alert(alert).await;
        }
        debug!(run = %self.run_id, "Alert feed closed");
    }

    pub async fn status(&self) -> SimulationStatus {
        let inner = self.inner.read().await;
        let latest = inner.latest.as_ref();
        SimulationStatus {
            run_id: self.run_id.clone(),
            tick: latest.map(|e| e.tick).unwrap_or(0),
            drift_status: latest
                .map(|e| e.drift.status)
                .unwrap_or(DriftStatus::Stable),
            model_version: latest
                .map(|e| e.prediction.model_version.clone())
                .unwrap_or_default(),
            fallback: latest.map(|e| e.prediction.fallback).unwrap_or(false),
            cells: latest.map(|e| e.plan.cells.len()).unwrap_or(0),
            events_seen: inner.events_seen,
            alerts_raised: inner.alerts.len(),
            last_alert: inner.alerts.values().next_back().cloned(),
        }
    }

    /// Every alert seen so far, oldest first
    pub async fn alerts(&self) -> Vec<AlertEvent> {
        self.inner.read().await.alerts.values().cloned().collect()
    }

    /// Most recent plans, newest last
    pub async fn recent_plans(&self, limit: usize) -> Vec<AllocationPlan> {
        let inner = self.inner.read().await;
        let skip = inner.plans.len().saturating_sub(limit);
        inner.plans.iter().skip(skip).cloned().collect()
    }

    pub async fn drift(&self) -> DriftSnapshot {
        let inner = self.inner.read().await;
        DriftSnapshot {
            state: inner
                .latest
                .as_ref()
                .map(|e| e.drift.clone())
                .unwrap_or_default(),
            timeline: inner.timeline.iter().cloned().collect(),
        }
    }

    pub async fn events_seen(&self) -> u64 {
        self.inner.read().await.events_seen
    }
}

#[async_trait]
impl EventSink for HistoryStore {
    fn name(&self) -> &'static str {
        "history"
    }

    async fn handle(&mut self, event: &TickEvent) -> Result<()> {
        self.record(event).await;
        Ok(())
    }
}

/// Outcome of a sink task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkReport {
    pub handled: u64,
    pub dropped: u64,
}

/// Drain the event stream into a sink until the channel closes
pub async fn run_sink<S: EventSink>(
    mut sink: S,
    mut events: broadcast::Receiver<TickEvent>,
    metrics: SimMetrics,
) -> Result<SinkReport> {
    let mut report = SinkReport::default();

    loop {
        match events.recv().await {
            Ok(event) => {
                sink.handle(&event).await?;
                report.handled += 1;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(
                    sink = sink.name(),
                    skipped, "Sink lagging behind, oldest events dropped"
                );
                report.dropped += skipped;
                metrics.add_dropped_events(skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    sink.flush().await?;
    debug!(
        sink = sink.name(),
        handled = report.handled,
        dropped = report.dropped,
        "Sink finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::models::{CellMetrics, MetricRecord};
    use crate::orchestrator::simulate;
    use tempfile::tempdir;

    fn events(n: u64) -> Vec<TickEvent> {
        let mut config = SimulationConfig::default();
        config.source.cells = 2;
        let records = (1..=n).map(|tick| MetricRecord {
            tick,
            timestamp: 1_700_000_000 + tick as i64,
            cells: vec![
                CellMetrics::with_load("Cell-1", 40.0 + (tick % 3) as f64),
                CellMetrics::with_load("Cell-2", 60.0),
            ],
        });
        simulate(config, records).unwrap()
    }

    #[tokio::test]
    async fn test_history_store_is_bounded() {
        let store = HistoryStore::new("run-test", 5);
        for event in events(12) {
            store.record(&event).await;
        }

        assert_eq!(store.recent_plans(10).await.len(), 5);
        assert_eq!(store.recent_plans(2).await.last().unwrap().tick, 12);
        assert_eq!(store.drift().await.timeline.len(), 5);

        let status = store.status().await;
        assert_eq!(status.tick, 12);
        assert_eq!(status.events_seen, 12);
        assert_eq!(status.cells, 2);
        assert_eq!(status.run_id, "run-test");
    }

    #[tokio::test]
    async fn test_jsonl_sink_writes_one_line_per_event() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let sink = JsonLinesSink::create(&path).await.unwrap();

        let (tx, rx) = broadcast::channel(16);
        let task = tokio::spawn(run_sink(sink, rx, SimMetrics::new()));
        for event in events(3) {
            tx.send(event).unwrap();
        }
        drop(tx);

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.handled, 3);

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: Vec<TickEvent> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[2].tick, 3);
    }

    #[tokio::test]
    async fn test_lagging_sink_drops_oldest_events() {
        let (tx, rx) = broadcast::channel(2);
        for event in events(5) {
            tx.send(event).unwrap();
        }
        drop(tx);

        let store = HistoryStore::new("run-test", 10);
        let report = run_sink(store.clone(), rx, SimMetrics::new()).await.unwrap();

        assert_eq!(report.dropped, 3);
        assert_eq!(report.handled, 2);
        // the newest events survive
        assert_eq!(store.status().await.tick, 5);
    }

    #[tokio::test]
    async fn test_alert_feed_fills_gaps_left_by_lagging_sink() {
        let mut config = SimulationConfig::default();
        config.source.cells = 2;
        config.drift.window = 5;
        let records: Vec<MetricRecord> = (1..=30)
            .map(|tick| MetricRecord {
                tick,
                timestamp: 1_700_000_000 + tick as i64,
                cells: vec![
                    CellMetrics::with_load("Cell-1", if tick > 15 { 90.0 } else { 40.0 }),
                    CellMetrics::with_load("Cell-2", 60.0 + (tick % 2) as f64),
                ],
            })
            .collect();
        let events = simulate(config, records).unwrap();
        let expected: Vec<AlertEvent> = events
            .iter()
            .flat_map(|e| e.alert.iter().chain(&e.data_alerts))
            .cloned()
            .collect();
        assert!(!expected.is_empty());

        // only the last two tick events reach the store
        let (tx, rx) = broadcast::channel(2);
        for event in &events {
            tx.send(event.clone()).unwrap();
        }
        drop(tx);
        let store = HistoryStore::new("run-test", 50);
        run_sink(store.clone(), rx, SimMetrics::new()).await.unwrap();

        let (alert_tx, alert_rx) = mpsc::unbounded_channel();
        for alert in &expected {
            alert_tx.send(alert.clone()).unwrap();
        }
        drop(alert_tx);
        store.clone().follow_alerts(alert_rx).await;

        assert_eq!(store.alerts().await, expected);
        let status = store.status().await;
        assert_eq!(status.alerts_raised, expected.len());
        assert_eq!(status.last_alert.as_ref(), expected.last());
    }
}
