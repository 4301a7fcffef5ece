//! API client for the simulator dashboard API

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Non-success answer from the API
#[derive(Debug, Error)]
#[error("API error ({status}): {body}")]
pub struct ApiError {
    pub status: StatusCode,
    pub body: String,
}

/// API client for the simulator
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        // health endpoints answer 503 with a usable body
        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError { status, body }.into());
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn status(&self) -> Result<SimulationStatus> {
        self.get("api/v1/status").await
    }

    pub async fn alerts(&self) -> Result<Vec<Alert>> {
        self.get("api/v1/alerts").await
    }

    pub async fn allocations(&self, limit: usize) -> Result<Vec<AllocationPlan>> {
        self.get(&format!("api/v1/allocations?limit={}", limit))
            .await
    }

    pub async fn drift(&self) -> Result<DriftSnapshot> {
        self.get("api/v1/drift").await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.get("healthz").await
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub tick: u64,
    pub timestamp: i64,
    pub severity: String,
    pub kind: String,
    pub message: String,
    pub episode_start: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationStatus {
    pub run_id: String,
    pub tick: u64,
    pub drift_status: String,
    pub model_version: String,
    pub fallback: bool,
    pub cells: usize,
    pub events_seen: u64,
    pub alerts_raised: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_alert: Option<Alert>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellAllocation {
    pub cell_id: String,
    pub predicted_demand: f64,
    pub shares: BTreeMap<String, f64>,
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub tick: u64,
    pub timestamp: i64,
    pub cells: Vec<CellAllocation>,
    pub smoothed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftState {
    pub status: String,
    pub baseline_mean: f64,
    pub baseline_std: f64,
    pub statistic: Option<f64>,
    pub last_residual: Option<f64>,
    pub residuals_seen: u64,
    pub streak: u32,
    pub rebaselines: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftPoint {
    pub tick: u64,
    pub status: String,
    pub statistic: Option<f64>,
    pub residual: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftSnapshot {
    pub state: DriftState,
    pub timeline: Vec<DriftPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_BODY: &str = r#"{
        "run_id": "run-7",
        "tick": 120,
        "drift_status": "WARNING",
        "model_version": "linear-v2",
        "fallback": false,
        "cells": 3,
        "events_seen": 120,
        "alerts_raised": 1,
        "last_alert": {
            "id": 1,
            "tick": 118,
            "timestamp": 1700000118,
            "severity": "warning",
            "kind": "drift_suspected",
            "message": "2023-11-14T22:15:18Z - ALERT: Concept drift detected (statistic: 2.4100, baseline mean: 0.0100).",
            "episode_start": 1700000118,
            "cause": {"status": "WARNING"}
        }
    }"#;

    #[tokio::test]
    async fn test_status_parses_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(STATUS_BODY)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let status = client.status().await.unwrap();

        mock.assert_async().await;
        assert_eq!(status.run_id, "run-7");
        assert_eq!(status.drift_status, "WARNING");
        assert_eq!(status.last_alert.unwrap().kind, "drift_suspected");
    }

    #[tokio::test]
    async fn test_allocations_sends_limit() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/allocations")
            .match_query(mockito::Matcher::UrlEncoded("limit".into(), "2".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"tick": 9, "timestamp": 1700000009, "smoothed": true, "cells": [
                    {"cell_id": "Cell-1", "predicted_demand": 61.5,
                     "shares": {"bandwidth_prb": 61.5}, "action": "hold"}]}]"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let plans = client.allocations(2).await.unwrap();

        mock.assert_async().await;
        assert_eq!(plans.len(), 1);
        assert!(plans[0].smoothed);
        assert_eq!(plans[0].cells[0].shares["bandwidth_prb"], 61.5);
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/alerts")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.alerts().await.unwrap_err();

        let api_error = err.downcast_ref::<ApiError>().unwrap();
        assert_eq!(api_error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api_error.body, "boom");
    }

    #[tokio::test]
    async fn test_unhealthy_body_still_parsed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/healthz")
            .with_status(503)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status": "unhealthy", "components": {
                    "pipeline": {"status": "unhealthy", "message": "bad capacity", "updated_at": 1}}}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let health = client.health().await.unwrap();

        assert_eq!(health.status, "unhealthy");
        assert_eq!(
            health.components["pipeline"].message.as_deref(),
            Some("bad capacity")
        );
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(ApiClient::new("not a url").is_err());
    }
}
