//! In-memory metrics store.
//!
//! Each target keeps a bounded FIFO history used for availability and
//! summaries. A second series spanning all targets is kept for the retention
//! window and pruned on a timer.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use thiserror::Error;

use super::models::*;
use super::snapshot::{StoreSnapshot, TargetState, SNAPSHOT_VERSION};
use super::stats::response_stats;
use crate::alerts::{Alert, AlertLevel};

/// Store error types.
#[derive(Error, Debug, PartialEq)]
pub enum StoreError {
    #[error("unknown target: {0}")]
    UnknownTarget(String),
}

/// Sizing and retention settings for the store.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Maximum samples kept per target.
    pub history_limit: usize,
    /// Number of most recent samples used for availability and summaries.
    pub availability_window: usize,
    /// How long samples stay in the cross-target series.
    pub retention: ChronoDuration,
    /// Maximum fired alerts kept for the dashboard.
    pub alert_history_limit: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            history_limit: 1000,
            availability_window: 20,
            retention: ChronoDuration::hours(24),
            alert_history_limit: 100,
        }
    }
}

/// Per-target mutable state.
#[derive(Debug, Clone)]
pub struct TargetRecord {
    target: Target,
    history: VecDeque<Sample>,
    consecutive_failures: u32,
    total_checks: u64,
    total_failures: u64,
}

impl TargetRecord {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            history: VecDeque::new(),
            consecutive_failures: 0,
            total_checks: 0,
            total_failures: 0,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.history.back()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Append a sample, evicting the oldest past `limit`.
    ///
    /// Timestamps strictly increase; a sample that does not advance past the
    /// previous one is moved forward by one microsecond.
    fn push(&mut self, mut sample: Sample, limit: usize) -> &Sample {
        if let Some(last) = self.history.back() {
            if sample.timestamp <= last.timestamp {
                tracing::debug!(
                    "Store: nudging non-monotonic sample timestamp for {}",
                    self.target.name
                );
                sample.timestamp = last.timestamp + ChronoDuration::microseconds(1);
            }
        }

        self.total_checks += 1;
        if sample.success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
            self.total_failures += 1;
        }

        self.history.push_back(sample);
        while self.history.len() > limit.max(1) {
            self.history.pop_front();
        }

        // push_back above guarantees a last element
        &self.history[self.history.len() - 1]
    }

    /// The last `n` samples, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Sample> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).cloned().collect()
    }

    /// Percentage of successful samples among the last `window` samples.
    ///
    /// Divides by the number of samples actually present when fewer than
    /// `window` exist. `None` before the first sample.
    pub fn availability(&self, window: usize) -> Option<f64> {
        let skip = self.history.len().saturating_sub(window.max(1));
        let (total, ok) = self
            .history
            .iter()
            .skip(skip)
            .fold((0usize, 0usize), |(total, ok), s| (total + 1, ok + s.success as usize));

        if total == 0 {
            return None;
        }
        Some((ok as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
    }

    /// Summary over the last `window` samples.
    pub fn summary(&self, window: usize) -> HealthSummary {
        let skip = self.history.len().saturating_sub(window.max(1));
        let recent: Vec<&Sample> = self.history.iter().skip(skip).collect();

        let mut status_codes = BTreeMap::new();
        for s in &recent {
            if let Some(code) = s.status_code {
                *status_codes.entry(code).or_insert(0u64) += 1;
            }
        }

        let times: Vec<f64> = recent
            .iter()
            .filter(|s| s.success)
            .map(|s| s.response_time)
            .collect();
        let stats = response_stats(&times);

        let availability = self.availability(window);
        let latest = self.latest();
        let status = match (latest, availability) {
            (None, _) => TargetStatus::Unknown,
            (Some(s), _) if !s.success => TargetStatus::Down,
            (Some(_), Some(a)) if a < 100.0 => TargetStatus::Degraded,
            _ => TargetStatus::Up,
        };

        HealthSummary {
            name: self.target.name.clone(),
            url: self.target.url.clone(),
            category: self.target.category,
            critical: self.target.critical,
            status,
            availability,
            avg_response_time: stats.map(|s| s.avg),
            min_response_time: stats.map(|s| s.min),
            max_response_time: stats.map(|s| s.max),
            p50_response_time: stats.map(|s| s.p50),
            p95_response_time: stats.map(|s| s.p95),
            status_codes,
            consecutive_failures: self.consecutive_failures,
            total_checks: self.total_checks,
            total_failures: self.total_failures,
            last_check: latest.map(|s| s.timestamp),
            last_error: self
                .history
                .iter()
                .rev()
                .find_map(|s| s.error.clone()),
            alert_level: AlertLevel::Normal,
        }
    }
}

/// A sample in the cross-target time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub target: String,
    pub sample: Sample,
}

/// Time-series store keyed by target name.
#[derive(Debug)]
pub struct MetricsStore {
    settings: StoreSettings,
    order: Vec<String>,
    records: HashMap<String, TargetRecord>,
    series: VecDeque<SeriesPoint>,
    alerts: VecDeque<Alert>,
}

impl MetricsStore {
    /// Create a store with one empty record per target, in configuration order.
    pub fn new(targets: &[Target], settings: StoreSettings) -> Self {
        let mut order = Vec::with_capacity(targets.len());
        let mut records = HashMap::with_capacity(targets.len());

        for target in targets {
            order.push(target.name.clone());
            records.insert(target.name.clone(), TargetRecord::new(target.clone()));
        }

        Self {
            settings,
            order,
            records,
            series: VecDeque::new(),
            alerts: VecDeque::new(),
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn target_count(&self) -> usize {
        self.order.len()
    }

    /// Record a sample for a target and return its updated record.
    pub fn record(&mut self, target: &str, sample: Sample) -> Result<&TargetRecord, StoreError> {
        let limit = self.settings.history_limit;
        let record = self
            .records
            .get_mut(target)
            .ok_or_else(|| StoreError::UnknownTarget(target.to_string()))?;

        let stored = record.push(sample, limit).clone();
        self.series.push_back(SeriesPoint {
            target: target.to_string(),
            sample: stored,
        });

        Ok(&self.records[target])
    }

    pub fn get(&self, target: &str) -> Option<&TargetRecord> {
        self.records.get(target)
    }

    /// The last `n` samples of a target, oldest first.
    pub fn recent_samples(&self, target: &str, n: usize) -> Result<Vec<Sample>, StoreError> {
        self.records
            .get(target)
            .map(|r| r.recent(n))
            .ok_or_else(|| StoreError::UnknownTarget(target.to_string()))
    }

    /// Drop series points older than the cutoff. Returns the number removed.
    pub fn prune(&mut self, older_than: DateTime<Utc>) -> usize {
        let before = self.series.len();
        self.series.retain(|p| p.sample.timestamp >= older_than);
        before - self.series.len()
    }

    /// Series points for one target recorded at or after `since`, oldest first.
    pub fn series_for(&self, target: &str, since: DateTime<Utc>) -> Result<Vec<Sample>, StoreError> {
        if !self.records.contains_key(target) {
            return Err(StoreError::UnknownTarget(target.to_string()));
        }
        Ok(self
            .series
            .iter()
            .filter(|p| p.target == target && p.sample.timestamp >= since)
            .map(|p| p.sample.clone())
            .collect())
    }

    pub fn series_len(&self) -> usize {
        self.series.len()
    }

    pub fn record_alert(&mut self, alert: Alert) {
        self.alerts.push_back(alert);
        while self.alerts.len() > self.settings.alert_history_limit {
            self.alerts.pop_front();
        }
    }

    /// Most recent alerts, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.alerts.iter().rev().take(limit).cloned().collect()
    }

    pub fn summary(&self, target: &str) -> Option<HealthSummary> {
        self.records
            .get(target)
            .map(|r| r.summary(self.settings.availability_window))
    }

    /// Summaries for every target, in configuration order.
    pub fn summaries(&self) -> Vec<HealthSummary> {
        self.order
            .iter()
            .filter_map(|name| self.summary(name))
            .collect()
    }

    /// Copy the full store state for persistence.
    pub fn export_snapshot(&self) -> StoreSnapshot {
        let targets = self
            .order
            .iter()
            .filter_map(|name| self.records.get(name))
            .map(|r| TargetState {
                name: r.target.name.clone(),
                history: r.history.iter().cloned().collect(),
                consecutive_failures: r.consecutive_failures,
                total_checks: r.total_checks,
                total_failures: r.total_failures,
            })
            .collect();

        StoreSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            targets,
            series: self.series.iter().cloned().collect(),
            alerts: self.alerts.iter().cloned().collect(),
        }
    }

    /// Restore state saved by [`MetricsStore::export_snapshot`].
    ///
    /// Targets that are no longer configured are skipped. Returns the number
    /// of targets restored.
    pub fn restore(&mut self, snapshot: StoreSnapshot) -> usize {
        let mut restored = 0;
        let limit = self.settings.history_limit.max(1);

        for state in snapshot.targets {
            let Some(record) = self.records.get_mut(&state.name) else {
                tracing::info!("Store: skipping saved state for unconfigured target {}", state.name);
                continue;
            };

            let skip = state.history.len().saturating_sub(limit);
            record.history = state.history.into_iter().skip(skip).collect();
            record.consecutive_failures = state.consecutive_failures;
            record.total_checks = state.total_checks;
            record.total_failures = state.total_failures;
            restored += 1;
        }

        let cutoff = Utc::now() - self.settings.retention;
        self.series = snapshot
            .series
            .into_iter()
            .filter(|p| self.records.contains_key(&p.target) && p.sample.timestamp >= cutoff)
            .collect();

        let skip = snapshot
            .alerts
            .len()
            .saturating_sub(self.settings.alert_history_limit);
        self.alerts = snapshot.alerts.into_iter().skip(skip).collect();

        restored
    }
}
