//! Events published by the collector and the views built from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::Alert;
use crate::store::{HealthSummary, Sample, TargetStatus};

/// Everything a live subscriber can observe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum MonitorEvent {
    SampleRecorded(SampleUpdate),
    AlertFired(Alert),
    ServiceStarted { at: DateTime<Utc>, targets: usize },
    ServiceStopped { at: DateTime<Utc> },
}

/// A freshly recorded sample with the target's updated summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleUpdate {
    pub target: String,
    pub sample: Sample,
    pub summary: HealthSummary,
}

/// Point-in-time view of all targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub targets: Vec<HealthSummary>,
    pub recent_alerts: Vec<Alert>,
}

/// One target's summary and recent history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDetail {
    pub summary: HealthSummary,
    pub history: Vec<Sample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Critical,
}

/// Aggregate health across all targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub overall_status: OverallStatus,
    pub total_targets: usize,
    pub targets_up: usize,
    pub targets_down: usize,
    /// Critical targets whose latest probe failed.
    pub critical_down: Vec<String>,
    pub average_availability: Option<f64>,
    pub targets: Vec<HealthSummary>,
}

impl HealthReport {
    pub fn from_summaries(targets: Vec<HealthSummary>) -> Self {
        let targets_up = targets.iter().filter(|t| t.status == TargetStatus::Up).count();
        let targets_down = targets.iter().filter(|t| t.status == TargetStatus::Down).count();
        let critical_down: Vec<String> = targets
            .iter()
            .filter(|t| t.critical && t.status == TargetStatus::Down)
            .map(|t| t.name.clone())
            .collect();

        let known: Vec<f64> = targets.iter().filter_map(|t| t.availability).collect();
        let average_availability = if known.is_empty() {
            None
        } else {
            Some(known.iter().sum::<f64>() / known.len() as f64)
        };

        let overall_status = if !critical_down.is_empty() {
            OverallStatus::Critical
        } else if targets
            .iter()
            .any(|t| matches!(t.status, TargetStatus::Down | TargetStatus::Degraded))
        {
            OverallStatus::Degraded
        } else {
            OverallStatus::Healthy
        };

        Self {
            generated_at: Utc::now(),
            overall_status,
            total_targets: targets.len(),
            targets_up,
            targets_down,
            critical_down,
            average_availability,
            targets,
        }
    }
}

/// Frames pushed to dashboard WebSocket clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum DashboardMessage {
    Initial(DashboardSnapshot),
    Metrics(SampleUpdate),
    Alert(Alert),
}

impl DashboardMessage {
    /// Map a bus event to a client frame. Lifecycle events are not forwarded.
    pub fn from_event(event: MonitorEvent) -> Option<Self> {
        match event {
            MonitorEvent::SampleRecorded(update) => Some(DashboardMessage::Metrics(update)),
            MonitorEvent::AlertFired(alert) => Some(DashboardMessage::Alert(alert)),
            MonitorEvent::ServiceStarted { .. } | MonitorEvent::ServiceStopped { .. } => None,
        }
    }
}
