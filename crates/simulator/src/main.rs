//! RAN Simulator - drift-adaptive 5G resource allocation
//!
//! Runs one simulation over a synthetic or replayed metric stream and serves
//! health, Prometheus metrics and a dashboard API while it runs.

use anyhow::{Context, Result};
use sim_lib::{
    api::{self, AppState},
    health::{components, HealthRegistry},
    observability::SimMetrics,
    orchestrator::{run_sink, HistoryStore, JsonLinesSink, Orchestrator, StopReason},
    source::build_source,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const SIMULATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = SIMULATOR_VERSION, "Starting ran-simulator");

    let config = config::AppConfig::load()?;
    let simulation = config.simulation.clone();
    let run_id = simulation.orchestrator.run_id.clone();
    info!(
        run_id = %run_id,
        cells = simulation.source.cells,
        source = ?simulation.source.kind,
        statistic = ?simulation.drift.statistic,
        "Simulator configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SOURCE).await;
    health_registry.register(components::PREDICTOR).await;
    health_registry.register(components::PIPELINE).await;
    health_registry.register(components::SINK).await;

    let metrics = SimMetrics::new();
    let history = HistoryStore::new(&run_id, simulation.orchestrator.history_limit);

    let source = build_source(&simulation.source, simulation.orchestrator.max_ticks)
        .context("Failed to open metric source")?;
    let mut orchestrator = Orchestrator::new(simulation.clone(), source)
        .context("Failed to build pipeline")?
        .with_health(health_registry.clone());

    // Sinks subscribe before the run starts so no tick is missed
    let alerts_handle = tokio::spawn(
        history
            .clone()
            .follow_alerts(orchestrator.subscribe_alerts()),
    );
    let mut sink_handles = vec![tokio::spawn(run_sink(
        history.clone(),
        orchestrator.subscribe(),
        metrics.clone(),
    ))];
    if let Some(path) = &simulation.orchestrator.artifact_path {
        let sink = JsonLinesSink::create(path)
            .await
            .with_context(|| format!("Failed to create artifact {}", path.display()))?;
        sink_handles.push(tokio::spawn(run_sink(
            sink,
            orchestrator.subscribe(),
            metrics.clone(),
        )));
    }

    let app_state = Arc::new(AppState::new(
        health_registry.clone(),
        metrics.clone(),
        history.clone(),
    ));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    health_registry.set_ready(true).await;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("SIGINT received");
            let _ = shutdown_tx.send(());
        }
    });

    let summary = orchestrator.run(shutdown_rx).await;

    for handle in sink_handles {
        match handle.await {
            Ok(Ok(report)) if report.dropped > 0 => {
                warn!(dropped = report.dropped, "Sink dropped events");
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                error!(error = %e, "Sink failed");
                health_registry
                    .set_unhealthy(components::SINK, e.to_string())
                    .await;
            }
            Err(e) => error!(error = %e, "Sink task panicked"),
        }
    }

    if let Err(e) = alerts_handle.await {
        error!(error = %e, "Alert feed task panicked");
    }

    let summary = summary.context("Simulation aborted")?;
    info!(
        ticks = summary.ticks,
        alerts = summary.alerts,
        stop_reason = %summary.stop_reason,
        final_drift = %summary.final_drift.status,
        model_version = %summary.model_version,
        "Simulation finished"
    );

    if config.keep_serving && summary.stop_reason != StopReason::Shutdown {
        info!(port = config.api_port, "Run complete, API still serving until interrupted");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Shutting down"),
            result = api_handle => {
                if let Ok(Err(e)) = result {
                    error!(error = %e, "API server stopped");
                }
            }
        }
    }

    Ok(())
}
