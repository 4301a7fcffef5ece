//! HTTP API for health checks, Prometheus metrics and the run dashboard

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::health::{ComponentStatus, HealthRegistry};
use crate::observability::SimMetrics;
use crate::orchestrator::HistoryStore;

/// Plans returned when no limit is given
const DEFAULT_PLAN_LIMIT: usize = 20;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: SimMetrics,
    pub history: HistoryStore,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, metrics: SimMetrics, history: HistoryStore) -> Self {
        Self {
            health_registry,
            metrics,
            history,
        }
    }
}

/// 200 while operational, 503 once any component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        ),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain; charset=utf-8")],
                e.to_string(),
            )
        }
    }
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.history.status().await)
}

async fn alerts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.history.alerts().await)
}

#[derive(Debug, Deserialize)]
struct PlanQuery {
    limit: Option<usize>,
}

async fn allocations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PlanQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_PLAN_LIMIT);
    Json(state.history.recent_plans(limit).await)
}

async fn drift(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.history.drift().await)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/status", get(status))
        .route("/api/v1/alerts", get(alerts))
        .route("/api/v1/allocations", get(allocations))
        .route("/api/v1/drift", get(drift))
        .with_state(state)
}

/// Bind and serve the API until the task is cancelled
pub async fn serve(port: u16, state: Arc<AppState>) -> std::io::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}
