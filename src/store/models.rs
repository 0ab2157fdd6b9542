//! Monitoring record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::alerts::AlertLevel;

/// Informational grouping for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetCategory {
    #[default]
    Web,
    Api,
    Cdn,
}

fn default_interval_ms() -> u64 {
    30_000
}

/// A monitored HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub category: TargetCategory,
    /// Poll interval in milliseconds.
    #[serde(rename = "interval", default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub critical: bool,
    /// Sub-paths probed together for a composite health check.
    #[serde(default)]
    pub health_endpoints: Vec<String>,
}

impl Target {
    pub fn new(name: &str, url: &str, interval: Duration) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            category: TargetCategory::default(),
            interval_ms: interval.as_millis() as u64,
            critical: false,
            health_endpoints: Vec::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// URLs probed on every poll: the base URL, or one URL per health endpoint.
    pub fn probe_urls(&self) -> Vec<String> {
        if self.health_endpoints.is_empty() {
            return vec![self.url.clone()];
        }

        let base = self.url.trim_end_matches('/');
        self.health_endpoints
            .iter()
            .map(|path| {
                if path.starts_with('/') {
                    format!("{}{}", base, path)
                } else {
                    format!("{}/{}", base, path)
                }
            })
            .collect()
    }
}

/// Classification of a failed probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Dns,
    Connect,
    Tls,
    Http,
    Body,
    InvalidUrl,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Dns => "dns",
            ErrorKind::Connect => "connect",
            ErrorKind::Tls => "tls",
            ErrorKind::Http => "http",
            ErrorKind::Body => "body",
            ErrorKind::InvalidUrl => "invalid_url",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Error attached to an unsuccessful sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl ProbeFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Per-phase timing breakdown in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTimings {
    pub dns: f64,
    pub connect: f64,
    pub first_byte: f64,
    pub download: f64,
}

/// One timed probe outcome.
///
/// `success` is true exactly when the status code is in `200..=399` and no
/// error was recorded; the constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    /// Total response time in milliseconds.
    pub response_time: f64,
    pub status_code: Option<u16>,
    /// Response body size in bytes.
    pub size: u64,
    pub timings: PhaseTimings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProbeFailure>,
}

impl Sample {
    /// A sample for a request that produced a response.
    pub fn from_status(
        timestamp: DateTime<Utc>,
        response_time: Duration,
        status: u16,
        size: u64,
        timings: PhaseTimings,
    ) -> Self {
        let error = if (200..=399).contains(&status) {
            None
        } else {
            Some(ProbeFailure::new(ErrorKind::Http, format!("HTTP {}", status)))
        };

        Self {
            timestamp,
            success: error.is_none(),
            response_time: duration_ms(response_time),
            status_code: Some(status),
            size,
            timings,
            error,
        }
    }

    /// A sample for a probe that failed before or while reading a response.
    pub fn failed(
        timestamp: DateTime<Utc>,
        response_time: Duration,
        status_code: Option<u16>,
        timings: PhaseTimings,
        failure: ProbeFailure,
    ) -> Self {
        Self {
            timestamp,
            success: false,
            response_time: duration_ms(response_time),
            status_code,
            size: 0,
            timings,
            error: Some(failure),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn is_timeout(&self) -> bool {
        self.error_kind() == Some(ErrorKind::Timeout)
    }
}

/// Convert a duration to fractional milliseconds.
pub fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Coarse health of a target derived from its recent samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Unknown,
    Up,
    Degraded,
    Down,
}

/// Read-time projection over a target's recent sample window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub name: String,
    pub url: String,
    pub category: TargetCategory,
    pub critical: bool,
    pub status: TargetStatus,
    /// Percentage of successful samples in the window, `None` before the first poll.
    pub availability: Option<f64>,
    pub avg_response_time: Option<f64>,
    pub min_response_time: Option<f64>,
    pub max_response_time: Option<f64>,
    pub p50_response_time: Option<f64>,
    pub p95_response_time: Option<f64>,
    pub status_codes: BTreeMap<u16, u64>,
    pub consecutive_failures: u32,
    pub total_checks: u64,
    pub total_failures: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<ProbeFailure>,
    pub alert_level: AlertLevel,
}
