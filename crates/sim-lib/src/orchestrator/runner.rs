//! Async simulation runner
//!
//! Drives a metric source through the pipeline, one tick at a time, and
//! publishes every tick event on a bounded broadcast channel and every alert
//! on unbounded alert feeds. Shutdown is
//! cooperative and checked between ticks, so a tick is always either fully
//! processed and published or not started.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{Pipeline, TickEvent};
use crate::config::{OrchestratorConfig, SimulationConfig};
use crate::drift::AlertEvent;
use crate::error::Result;
use crate::health::{components, HealthRegistry};
use crate::models::DriftState;
use crate::source::MetricSource;

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxTicks,
    SourceExhausted,
    Shutdown,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::MaxTicks => write!(f, "max_ticks"),
            StopReason::SourceExhausted => write!(f, "source_exhausted"),
            StopReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Summary returned when a run ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub events: u64,
    pub alerts: usize,
    pub stop_reason: StopReason,
    pub final_drift: DriftState,
    pub model_version: String,
}

/// Owns the pipeline and the source for one run
pub struct Orchestrator {
    pipeline: Pipeline,
    source: Box<dyn MetricSource>,
    config: OrchestratorConfig,
    events: broadcast::Sender<TickEvent>,
    alert_feeds: Vec<mpsc::UnboundedSender<AlertEvent>>,
    health: Option<HealthRegistry>,
}

impl Orchestrator {
    /// Build a runner with the default linear pipeline
    ///
    /// Fails when the source can carry more cells than the allocator's
    /// minimum share fits into capacity.
    pub fn new(config: SimulationConfig, source: Box<dyn MetricSource>) -> Result<Self> {
        if let Some(cells) = source.max_cells() {
            config.allocator.validate_for_cells(cells)?;
        }
        let orchestrator_config = config.orchestrator.clone();
        let pipeline = Pipeline::new(config)?;
        Ok(Self::with_pipeline(pipeline, source, orchestrator_config))
    }

    pub fn with_pipeline(
        pipeline: Pipeline,
        source: Box<dyn MetricSource>,
        config: OrchestratorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            pipeline,
            source,
            config,
            events,
            alert_feeds: Vec::new(),
            health: None,
        }
    }

    /// Report component health while running
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// New receiver of tick events; subscribe before calling `run`
    pub fn subscribe(&self) -> broadcast::Receiver<TickEvent> {
        self.events.subscribe()
    }

    /// New feed receiving every alert of the run, never dropped; subscribe
    /// before calling `run`
    pub fn subscribe_alerts(&mut self) -> mpsc::UnboundedReceiver<AlertEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.alert_feeds.push(tx);
        rx
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Run until `max_ticks`, source exhaustion or a shutdown signal.
    ///
    /// Only fatal errors end the run early.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<RunSummary> {
        let logger = self.pipeline.logger().clone();
        logger.log_simulation_started(
            self.source.name(),
            self.pipeline.config().source.cells,
            self.pipeline.statistic_name(),
        );

        let mut ticker = (self.config.tick_interval_ms > 0).then(|| {
            let mut ticker = interval(Duration::from_millis(self.config.tick_interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        let mut ticks = 0u64;
        let mut fallback_reported = false;
        let mut alerts_published = 0usize;

        let stop_reason = loop {
            if self.config.max_ticks.is_some_and(|max| ticks >= max) {
                break StopReason::MaxTicks;
            }

            match &mut ticker {
                Some(ticker) => {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = shutdown.recv() => break StopReason::Shutdown,
                    }
                }
                None => {
                    if shutdown_requested(&mut shutdown) {
                        break StopReason::Shutdown;
                    }
                    tokio::task::yield_now().await;
                }
            }

            let Some(record) = self.source.next_record() else {
                break StopReason::SourceExhausted;
            };
            ticks += 1;

            let outcome = self.pipeline.step(record);
            alerts_published = self.publish_alerts(alerts_published);

            match outcome {
                Ok(Some(event)) => {
                    if event.prediction.fallback != fallback_reported {
                        fallback_reported = event.prediction.fallback;
                        report_predictor(self.health.as_ref(), fallback_reported).await;
                    }
                    // No receivers is fine; sinks are optional
                    if self.events.send(event).is_err() {
                        debug!("No event subscribers");
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Fatal pipeline error, stopping run");
                    if let Some(health) = &self.health {
                        health
                            .set_unhealthy(components::PIPELINE, e.to_string())
                            .await;
                    }
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, "Tick failed, continuing");
                }
            }
        };

        let stats = self.pipeline.stats().clone();
        let summary = RunSummary {
            ticks,
            events: stats.events,
            alerts: self.pipeline.alert_history().len(),
            stop_reason,
            final_drift: self.pipeline.drift_state().clone(),
            model_version: self.pipeline.model_version().to_string(),
        };

        if let Some(health) = &self.health {
            if stop_reason == StopReason::SourceExhausted {
                health
                    .set_degraded(components::SOURCE, "Metric source exhausted")
                    .await;
            }
        }

        logger.log_simulation_finished(summary.ticks, summary.alerts, &stop_reason.to_string());
        info!(
            ticks = summary.ticks,
            events = summary.events,
            skipped = stats.skipped_ticks,
            fallbacks = stats.fallback_predictions,
            refits = stats.refits,
            "Run complete"
        );
        Ok(summary)
    }

    /// Send alerts raised since `published`; returns the new count
    fn publish_alerts(&mut self, published: usize) -> usize {
        let history = self.pipeline.alert_history();
        for alert in &history[published..] {
            // feeds whose receiver is gone are dropped
            self.alert_feeds
                .retain(|feed| feed.send(alert.clone()).is_ok());
        }
        history.len()
    }
}

async fn report_predictor(health: Option<&HealthRegistry>, fallback: bool) {
    let Some(health) = health else {
        return;
    };
    if fallback {
        health
            .set_degraded(components::PREDICTOR, "Serving persistence fallback")
            .await;
    } else {
        health.set_healthy(components::PREDICTOR).await;
    }
}

/// Non-blocking check of the shutdown channel; a dropped sender is not a
/// shutdown request
fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    use broadcast::error::TryRecvError;
    match shutdown.try_recv() {
        Ok(()) | Err(TryRecvError::Lagged(_)) => true,
        Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => false,
    }
}
