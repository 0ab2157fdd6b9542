//! Alert types and threshold evaluation.

mod evaluator;

pub use evaluator::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which rule produced an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ResponseTime,
    Availability,
    ConsecutiveFailures,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertKind::ResponseTime => "response_time",
            AlertKind::Availability => "availability",
            AlertKind::ConsecutiveFailures => "consecutive_failures",
        };
        f.write_str(s)
    }
}

/// Alert severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Critical => f.write_str("critical"),
        }
    }
}

/// Current level of one `(target, kind)` alert state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    #[default]
    Normal,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn severity(self) -> Option<Severity> {
        match self {
            AlertLevel::Normal => None,
            AlertLevel::Warning => Some(Severity::Warning),
            AlertLevel::Critical => Some(Severity::Critical),
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Normal => f.write_str("normal"),
            AlertLevel::Warning => f.write_str("warning"),
            AlertLevel::Critical => f.write_str("critical"),
        }
    }
}

/// A detected threshold violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: u64,
    pub target: String,
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    /// Value that crossed the threshold.
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}
