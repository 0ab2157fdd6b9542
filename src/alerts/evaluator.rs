//! Threshold evaluation with per-key cooldown.
//!
//! Every `(target, kind)` pair runs a small level machine
//! (`Normal`, `Warning`, `Critical`) driven by the sample just recorded.
//! Alerts are emitted while a level is raised, at most once per cooldown for a
//! given `(target, kind, severity)`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use super::{Alert, AlertKind, AlertLevel, Severity};
use crate::store::TargetRecord;

/// Evaluation error types.
#[derive(Error, Debug, PartialEq)]
pub enum EvaluationError {
    #[error("invalid {kind} thresholds: {reason}")]
    InvalidThreshold { kind: AlertKind, reason: String },
    #[error("non-finite {kind} value: {value}")]
    NonFinite { kind: AlertKind, value: f64 },
}

/// Warning and critical thresholds for one alert kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPair {
    pub warning: f64,
    pub critical: f64,
}

/// Thresholds for every alert kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertThresholds {
    /// Milliseconds; alert when the current sample is slower.
    pub response_time: ThresholdPair,
    /// Percent; alert when rolling availability drops below.
    pub availability: ThresholdPair,
    /// Failure streak length; alert when reached.
    pub consecutive_failures: ThresholdPair,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            response_time: ThresholdPair {
                warning: 2000.0,
                critical: 5000.0,
            },
            availability: ThresholdPair {
                warning: 99.0,
                critical: 95.0,
            },
            consecutive_failures: ThresholdPair {
                warning: 2.0,
                critical: 3.0,
            },
        }
    }
}

impl AlertThresholds {
    pub fn validate(&self) -> Result<(), EvaluationError> {
        let invalid = |kind, reason: &str| EvaluationError::InvalidThreshold {
            kind,
            reason: reason.to_string(),
        };

        for (kind, pair) in [
            (AlertKind::ResponseTime, self.response_time),
            (AlertKind::Availability, self.availability),
            (AlertKind::ConsecutiveFailures, self.consecutive_failures),
        ] {
            if !pair.warning.is_finite() || !pair.critical.is_finite() {
                return Err(invalid(kind, "thresholds must be finite"));
            }
        }

        let rt = self.response_time;
        if rt.warning <= 0.0 || rt.critical < rt.warning {
            return Err(invalid(
                AlertKind::ResponseTime,
                "expected 0 < warning <= critical",
            ));
        }

        let av = self.availability;
        if !(0.0..=100.0).contains(&av.warning)
            || !(0.0..=100.0).contains(&av.critical)
            || av.critical > av.warning
        {
            return Err(invalid(
                AlertKind::Availability,
                "expected 0 <= critical <= warning <= 100",
            ));
        }

        let cf = self.consecutive_failures;
        if cf.warning < 1.0 || cf.critical < cf.warning {
            return Err(invalid(
                AlertKind::ConsecutiveFailures,
                "expected 1 <= warning <= critical",
            ));
        }

        Ok(())
    }
}

type LevelKey = (String, AlertKind);
type CooldownKey = (String, AlertKind, Severity);

struct Check {
    kind: AlertKind,
    value: f64,
    level: AlertLevel,
    threshold: f64,
}

/// Stateful alert evaluator.
pub struct AlertEvaluator {
    thresholds: AlertThresholds,
    cooldown: Duration,
    availability_window: usize,
    levels: HashMap<LevelKey, AlertLevel>,
    last_fired: HashMap<CooldownKey, Instant>,
    next_id: u64,
}

impl AlertEvaluator {
    pub fn new(thresholds: AlertThresholds, cooldown: Duration, availability_window: usize) -> Self {
        Self {
            thresholds,
            cooldown,
            availability_window,
            levels: HashMap::new(),
            last_fired: HashMap::new(),
            next_id: 1,
        }
    }

    /// Evaluate a target right after a sample was recorded.
    ///
    /// Returns the alerts that passed the cooldown check. Level state is
    /// updated even when an alert is suppressed.
    pub fn evaluate(
        &mut self,
        record: &TargetRecord,
        now: Instant,
    ) -> Result<Vec<Alert>, EvaluationError> {
        self.thresholds.validate()?;

        let Some(sample) = record.latest() else {
            return Ok(Vec::new());
        };

        let mut checks = Vec::with_capacity(3);

        // Failed samples count too; a timed-out probe reports its elapsed time.
        if sample.success || sample.response_time.is_finite() {
            let pair = self.thresholds.response_time;
            let value = finite(AlertKind::ResponseTime, sample.response_time)?;
            checks.push(above(AlertKind::ResponseTime, value, pair));
        }

        if let Some(availability) = record.availability(self.availability_window) {
            let pair = self.thresholds.availability;
            let value = finite(AlertKind::Availability, availability)?;
            let (level, threshold) = if value < pair.critical {
                (AlertLevel::Critical, pair.critical)
            } else if value < pair.warning {
                (AlertLevel::Warning, pair.warning)
            } else {
                (AlertLevel::Normal, pair.warning)
            };
            checks.push(Check {
                kind: AlertKind::Availability,
                value,
                level,
                threshold,
            });
        }

        let pair = self.thresholds.consecutive_failures;
        let streak = record.consecutive_failures() as f64;
        let (level, threshold) = if streak >= pair.critical {
            (AlertLevel::Critical, pair.critical)
        } else if streak >= pair.warning {
            (AlertLevel::Warning, pair.warning)
        } else {
            (AlertLevel::Normal, pair.warning)
        };
        checks.push(Check {
            kind: AlertKind::ConsecutiveFailures,
            value: streak,
            level,
            threshold,
        });

        let target = &record.target().name;
        let mut alerts = Vec::new();

        for check in checks {
            self.transition(target, check.kind, check.level);

            let Some(severity) = check.level.severity() else {
                continue;
            };

            let key = (target.clone(), check.kind, severity);
            if let Some(at) = self.last_fired.get(&key) {
                if now.saturating_duration_since(*at) < self.cooldown {
                    tracing::debug!(
                        "Alerts: suppressed {} {} for {} (cooldown)",
                        severity,
                        check.kind,
                        target
                    );
                    continue;
                }
            }
            self.last_fired.insert(key, now);

            let id = self.next_id;
            self.next_id += 1;
            alerts.push(Alert {
                id,
                target: target.clone(),
                kind: check.kind,
                severity,
                message: describe(target, &check, severity),
                value: check.value,
                threshold: check.threshold,
                timestamp: Utc::now(),
            });
        }

        Ok(alerts)
    }

    fn transition(&mut self, target: &str, kind: AlertKind, level: AlertLevel) {
        let prev = self
            .levels
            .insert((target.to_string(), kind), level)
            .unwrap_or_default();

        if prev == level {
            return;
        }

        if level == AlertLevel::Normal {
            tracing::info!("Alerts: {} {} recovered (was {})", target, kind, prev);
        } else {
            tracing::warn!("Alerts: {} {} {} -> {}", target, kind, prev, level);
        }
    }

    /// Current level of one alert state machine.
    pub fn level(&self, target: &str, kind: AlertKind) -> AlertLevel {
        self.levels
            .get(&(target.to_string(), kind))
            .copied()
            .unwrap_or_default()
    }

    /// Highest level across all alert kinds of a target.
    pub fn highest_level(&self, target: &str) -> AlertLevel {
        [
            AlertKind::ResponseTime,
            AlertKind::Availability,
            AlertKind::ConsecutiveFailures,
        ]
        .into_iter()
        .map(|kind| self.level(target, kind))
        .max()
        .unwrap_or_default()
    }
}

fn finite(kind: AlertKind, value: f64) -> Result<f64, EvaluationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EvaluationError::NonFinite { kind, value })
    }
}

fn above(kind: AlertKind, value: f64, pair: ThresholdPair) -> Check {
    let (level, threshold) = if value > pair.critical {
        (AlertLevel::Critical, pair.critical)
    } else if value > pair.warning {
        (AlertLevel::Warning, pair.warning)
    } else {
        (AlertLevel::Normal, pair.warning)
    };
    Check {
        kind,
        value,
        level,
        threshold,
    }
}

fn describe(target: &str, check: &Check, severity: Severity) -> String {
    match check.kind {
        AlertKind::ResponseTime => format!(
            "{}: response time {:.0}ms exceeds {} threshold {:.0}ms",
            target, check.value, severity, check.threshold
        ),
        AlertKind::Availability => format!(
            "{}: availability {:.1}% below {} threshold {:.1}%",
            target, check.value, severity, check.threshold
        ),
        AlertKind::ConsecutiveFailures => format!(
            "{}: {} consecutive failures reached {} threshold {}",
            target, check.value as u64, severity, check.threshold as u64
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ErrorKind, MetricsStore, PhaseTimings, ProbeFailure, Sample, StoreSettings, Target};
    use chrono::Duration as ChronoDuration;

    const COOLDOWN: Duration = Duration::from_secs(300);

    fn store() -> MetricsStore {
        let targets = vec![Target::new("API", "http://api.example.com", Duration::from_secs(1))];
        MetricsStore::new(&targets, StoreSettings::default())
    }

    fn sample(seq: i64, status: u16, ms: u64) -> Sample {
        let at = Utc::now() + ChronoDuration::milliseconds(seq);
        Sample::from_status(at, Duration::from_millis(ms), status, 0, PhaseTimings::default())
    }

    fn only_failures() -> AlertThresholds {
        AlertThresholds {
            availability: ThresholdPair {
                warning: 0.0,
                critical: 0.0,
            },
            consecutive_failures: ThresholdPair {
                warning: 3.0,
                critical: 3.0,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_default_thresholds_are_valid() {
        assert!(AlertThresholds::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_thresholds() {
        let mut t = AlertThresholds::default();
        t.response_time.critical = 1000.0;
        assert!(matches!(
            t.validate(),
            Err(EvaluationError::InvalidThreshold {
                kind: AlertKind::ResponseTime,
                ..
            })
        ));

        let mut t = AlertThresholds::default();
        t.availability.warning = 150.0;
        assert!(t.validate().is_err());

        let mut t = AlertThresholds::default();
        t.consecutive_failures.warning = f64::NAN;
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_invalid_thresholds_yield_error_not_alerts() {
        let mut store = store();
        let mut t = AlertThresholds::default();
        t.availability.critical = 100.0;
        t.availability.warning = 50.0;
        let mut eval = AlertEvaluator::new(t, COOLDOWN, 20);

        let record = store.record("API", sample(0, 500, 5)).unwrap();
        assert!(eval.evaluate(record, Instant::now()).is_err());
    }

    #[test]
    fn test_consecutive_failures_fire_on_third() {
        let mut store = store();
        let mut eval = AlertEvaluator::new(only_failures(), COOLDOWN, 20);
        let now = Instant::now();

        for i in 0..2 {
            let record = store.record("API", sample(i, 500, 5)).unwrap();
            assert!(eval.evaluate(record, now).unwrap().is_empty());
        }

        let record = store.record("API", sample(2, 500, 5)).unwrap();
        let alerts = eval.evaluate(record, now).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::ConsecutiveFailures);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].value, 3.0);
        assert_eq!(eval.level("API", AlertKind::ConsecutiveFailures), AlertLevel::Critical);

        // further failures inside the cooldown stay quiet
        for i in 3..10 {
            let record = store.record("API", sample(i, 500, 5)).unwrap();
            assert!(eval.evaluate(record, now + Duration::from_secs(i as u64)).unwrap().is_empty());
        }

        // and fire again once the cooldown has elapsed
        let record = store.record("API", sample(10, 500, 5)).unwrap();
        let alerts = eval.evaluate(record, now + COOLDOWN).unwrap();
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn test_slow_response_is_instantaneous_critical() {
        let mut store = store();
        let mut eval = AlertEvaluator::new(AlertThresholds::default(), COOLDOWN, 20);
        let now = Instant::now();

        let record = store.record("API", sample(0, 200, 6000)).unwrap();
        let alerts = eval.evaluate(record, now).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::ResponseTime);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].threshold, 5000.0);

        let record = store.record("API", sample(1, 200, 6000)).unwrap();
        assert!(eval.evaluate(record, now + Duration::from_secs(60)).unwrap().is_empty());

        let record = store.record("API", sample(2, 200, 6000)).unwrap();
        let alerts = eval.evaluate(record, now + Duration::from_secs(301)).unwrap();
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn test_slow_failed_samples_raise_response_time() {
        let mut store = store();
        let mut eval = AlertEvaluator::new(AlertThresholds::default(), COOLDOWN, 20);
        let now = Instant::now();

        let record = store.record("API", sample(0, 504, 6000)).unwrap();
        let alerts = eval.evaluate(record, now).unwrap();
        let slow = alerts.iter().find(|a| a.kind == AlertKind::ResponseTime).unwrap();
        assert_eq!(slow.severity, Severity::Critical);
        assert_eq!(slow.value, 6000.0);

        let timed_out = Sample::failed(
            Utc::now() + ChronoDuration::milliseconds(1),
            Duration::from_secs(10),
            None,
            PhaseTimings::default(),
            ProbeFailure::new(ErrorKind::Timeout, "no response"),
        );
        let record = store.record("API", timed_out).unwrap();
        eval.evaluate(record, now + Duration::from_secs(1)).unwrap();
        assert_eq!(eval.level("API", AlertKind::ResponseTime), AlertLevel::Critical);
    }

    #[test]
    fn test_escalation_fires_independently() {
        let mut store = store();
        let mut eval = AlertEvaluator::new(AlertThresholds::default(), COOLDOWN, 20);
        let now = Instant::now();

        let record = store.record("API", sample(0, 200, 3000)).unwrap();
        let alerts = eval.evaluate(record, now).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Warning);

        let record = store.record("API", sample(1, 200, 7000)).unwrap();
        let alerts = eval.evaluate(record, now + Duration::from_secs(1)).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);

        let record = store.record("API", sample(2, 200, 100)).unwrap();
        assert!(eval.evaluate(record, now + Duration::from_secs(2)).unwrap().is_empty());
        assert_eq!(eval.level("API", AlertKind::ResponseTime), AlertLevel::Normal);
    }

    #[test]
    fn test_availability_alert() {
        let mut store = store();
        let thresholds = AlertThresholds {
            consecutive_failures: ThresholdPair {
                warning: 100.0,
                critical: 100.0,
            },
            ..Default::default()
        };
        let mut eval = AlertEvaluator::new(thresholds, COOLDOWN, 4);
        let now = Instant::now();

        for i in 0..3 {
            let record = store.record("API", sample(i, 200, 10)).unwrap();
            assert!(eval.evaluate(record, now).unwrap().is_empty());
        }

        // 3 of 4 succeeded: 75% is below the 95% critical line
        let record = store.record("API", sample(3, 503, 10)).unwrap();
        let alerts = eval.evaluate(record, now).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Availability);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].value, 75.0);
        assert_eq!(eval.highest_level("API"), AlertLevel::Critical);
    }

    #[test]
    fn test_alert_ids_increase() {
        let mut store = store();
        let mut eval = AlertEvaluator::new(AlertThresholds::default(), Duration::ZERO, 20);
        let now = Instant::now();

        let mut ids = Vec::new();
        for i in 0..3 {
            let record = store.record("API", sample(i, 200, 9000)).unwrap();
            ids.extend(eval.evaluate(record, now).unwrap().into_iter().map(|a| a.id));
        }
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
