//! Drift alerting
//!
//! Converts per-tick drift states into debounced alert events:
//! - one `drift_suspected` warning when a warning episode opens
//! - one `drift_confirmed` critical alert when drift is confirmed
//! - one `drift_resolved` notice when the detector settles back to STABLE
//! - one `data_drift` warning each time an input feature's PSI crosses its
//!   threshold
//!
//! Repeated ticks in the same status never produce another event.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::FeatureDrift;
use crate::models::{DriftState, DriftStatus};

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "info"),
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Alert classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    DriftSuspected,
    DriftConfirmed,
    DriftResolved,
    DataDrift,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::DriftSuspected => write!(f, "drift_suspected"),
            AlertKind::DriftConfirmed => write!(f, "drift_confirmed"),
            AlertKind::DriftResolved => write!(f, "drift_resolved"),
            AlertKind::DataDrift => write!(f, "data_drift"),
        }
    }
}

/// A drift alert with the detector state that caused it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Sequential id, starting at 1 for each run
    pub id: u64,
    pub tick: u64,
    pub timestamp: i64,
    pub severity: AlertSeverity,
    pub kind: AlertKind,
    pub message: String,
    /// Timestamp of the event that opened this drift episode
    pub episode_start: i64,
    pub cause: DriftState,
    /// Input feature behind a `data_drift` alert
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<FeatureDrift>,
}

/// Alertmanager webhook alert format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerAlert {
    /// firing or resolved
    pub status: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    /// RFC3339 start of the drift episode
    pub starts_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
}

/// Alertmanager webhook payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertmanagerPayload {
    pub alerts: Vec<AlertmanagerAlert>,
}

/// Debounces drift transitions into alert events
pub struct AlertManager {
    last_status: DriftStatus,
    next_id: u64,
    /// Timestamp at which the open episode started
    episode_start: Option<i64>,
    history: Vec<AlertEvent>,
    source: String,
}

impl AlertManager {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            last_status: DriftStatus::Stable,
            next_id: 1,
            episode_start: None,
            history: Vec::new(),
            source: source.into(),
        }
    }

    /// Feed the latest drift state; returns an event only on a transition
    /// that deserves one
    pub fn on_drift_state(
        &mut self,
        state: &DriftState,
        tick: u64,
        timestamp: i64,
    ) -> Option<AlertEvent> {
        let previous = self.last_status;
        let current = state.status;
        self.last_status = current;

        if previous == current {
            return None;
        }

        let (kind, severity) = match (previous, current) {
            (DriftStatus::Stable, DriftStatus::Warning) => {
                (AlertKind::DriftSuspected, AlertSeverity::Warning)
            }
            (_, DriftStatus::Drifting) => (AlertKind::DriftConfirmed, AlertSeverity::Critical),
            (_, DriftStatus::Stable) => (AlertKind::DriftResolved, AlertSeverity::Info),
            // de-escalation from DRIFTING to WARNING stays silent
            _ => return None,
        };

        let episode_start = match kind {
            AlertKind::DriftResolved => self.episode_start.take().unwrap_or(timestamp),
            _ => *self.episode_start.get_or_insert(timestamp),
        };

        let event = AlertEvent {
            id: self.next_id,
            tick,
            timestamp,
            severity,
            kind,
            message: format_message(kind, state, timestamp),
            episode_start,
            cause: state.clone(),
            feature: None,
        };
        Some(self.push(event))
    }

    /// Raise a `data_drift` warning for a feature whose PSI crossed its
    /// threshold. `state` is the residual detector state at that tick.
    pub fn on_data_drift(
        &mut self,
        finding: FeatureDrift,
        state: &DriftState,
        tick: u64,
        timestamp: i64,
    ) -> AlertEvent {
        let event = AlertEvent {
            id: self.next_id,
            tick,
            timestamp,
            severity: AlertSeverity::Warning,
            kind: AlertKind::DataDrift,
            message: format!(
                "{} - ALERT: Data drift detected for feature '{}' (PSI: {:.4}).",
                rfc3339(timestamp),
                finding.feature,
                finding.psi
            ),
            episode_start: timestamp,
            cause: state.clone(),
            feature: Some(finding),
        };
        self.push(event)
    }

    fn push(&mut self, event: AlertEvent) -> AlertEvent {
        self.next_id += 1;
        self.history.push(event.clone());
        event
    }

    /// Every event raised so far, oldest first
    pub fn history(&self) -> &[AlertEvent] {
        &self.history
    }

    pub fn last_status(&self) -> DriftStatus {
        self.last_status
    }

    /// Convert an event into an Alertmanager alert
    pub fn to_alertmanager(&self, event: &AlertEvent) -> AlertmanagerAlert {
        let alertname = match event.kind {
            AlertKind::DataDrift => "DataDrift",
            _ => "ResidualDrift",
        };
        let mut labels = HashMap::new();
        labels.insert("alertname".to_string(), alertname.to_string());
        labels.insert("severity".to_string(), event.severity.to_string());
        labels.insert("kind".to_string(), event.kind.to_string());
        labels.insert("source".to_string(), self.source.clone());

        let mut annotations = HashMap::new();
        annotations.insert("summary".to_string(), event.message.clone());
        annotations.insert("tick".to_string(), event.tick.to_string());
        annotations.insert(
            "baseline_mean".to_string(),
            format!("{:.4}", event.cause.baseline_mean),
        );
        if let Some(statistic) = event.cause.statistic {
            annotations.insert("statistic".to_string(), format!("{:.4}", statistic));
        }
        if let Some(feature) = &event.feature {
            labels.insert("feature".to_string(), feature.feature.clone());
            annotations.insert("psi".to_string(), format!("{:.4}", feature.psi));
        }

        let (status, ends_at) = match event.kind {
            AlertKind::DriftResolved => ("resolved", Some(rfc3339(event.timestamp))),
            _ => ("firing", None),
        };

        AlertmanagerAlert {
            status: status.to_string(),
            labels,
            annotations,
            starts_at: rfc3339(event.episode_start),
            ends_at,
        }
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new("ran-simulator")
    }
}

fn rfc3339(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn format_message(kind: AlertKind, state: &DriftState, timestamp: i64) -> String {
    let prefix = format!("{} - ALERT: ", rfc3339(timestamp));
    let statistic = state.statistic.unwrap_or(0.0);
    match kind {
        AlertKind::DriftSuspected => format!(
            "{}Concept drift suspected (statistic: {:.4}, residual: {:.4}).",
            prefix,
            statistic,
            state.last_residual.unwrap_or(0.0)
        ),
        AlertKind::DriftConfirmed => format!(
            "{}Concept drift detected (statistic: {:.4}, baseline mean: {:.4}).",
            prefix, statistic, state.baseline_mean
        ),
        AlertKind::DriftResolved => format!(
            "{}Concept drift resolved (baseline mean: {:.4}, rebaselines: {}).",
            prefix, state.baseline_mean, state.rebaselines
        ),
        AlertKind::DataDrift => format!("{}Data drift detected.", prefix),
    }
}
