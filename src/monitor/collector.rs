//! The poll cycle: record, evaluate, publish, notify.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::events::{DashboardSnapshot, HealthReport, MonitorEvent, SampleUpdate, TargetDetail};
use crate::alerts::{Alert, AlertEvaluator};
use crate::config::MonitorConfig;
use crate::notify::Dispatcher;
use crate::store::{HealthSummary, MetricsStore, Sample, StoreSnapshot};

const EVENT_CAPACITY: usize = 256;
const SNAPSHOT_ALERTS: usize = 20;

/// Shared state behind the scheduler and the dashboard.
///
/// Lock order is store, then evaluator. Events are sent while the store
/// write lock is held so that `subscribe` never misses or repeats a sample.
pub struct Collector {
    store: RwLock<MetricsStore>,
    evaluator: Mutex<AlertEvaluator>,
    dispatcher: Dispatcher,
    events: broadcast::Sender<MonitorEvent>,
}

impl Collector {
    pub fn new(store: MetricsStore, evaluator: AlertEvaluator, dispatcher: Dispatcher) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store: RwLock::new(store),
            evaluator: Mutex::new(evaluator),
            dispatcher,
            events,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        let settings = config.store_settings();
        let evaluator = AlertEvaluator::new(
            config.thresholds.clone(),
            config.monitor.alert_cooldown(),
            settings.availability_window,
        );
        let dispatcher = Dispatcher::from_config(&config.notifications, config.monitor.notification_timeout());
        Self::new(MetricsStore::new(&config.targets, settings), evaluator, dispatcher)
    }

    /// Run one poll cycle for a sample that was just taken.
    ///
    /// Never fails: store and evaluation errors are logged and the cycle
    /// yields no alerts.
    pub async fn process(&self, target: &str, sample: Sample) -> Vec<Alert> {
        let alerts = {
            let mut store = self.store.write();
            let window = store.settings().availability_window;

            let (update, alerts) = {
                let record = match store.record(target, sample) {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::warn!("Collector: dropping sample: {}", e);
                        return Vec::new();
                    }
                };

                let mut evaluator = self.evaluator.lock();
                let alerts = match evaluator.evaluate(record, Instant::now()) {
                    Ok(alerts) => alerts,
                    Err(e) => {
                        tracing::warn!("Collector: alert evaluation for {} failed: {}", target, e);
                        Vec::new()
                    }
                };

                let mut summary = record.summary(window);
                summary.alert_level = evaluator.highest_level(target);
                let update = record.latest().cloned().map(|sample| SampleUpdate {
                    target: target.to_string(),
                    sample,
                    summary,
                });
                (update, alerts)
            };

            for alert in &alerts {
                store.record_alert(alert.clone());
            }

            if let Some(update) = update {
                self.publish(MonitorEvent::SampleRecorded(update));
            }
            for alert in &alerts {
                self.publish(MonitorEvent::AlertFired(alert.clone()));
            }
            alerts
        };

        for alert in &alerts {
            tracing::warn!(
                service = %alert.target,
                kind = %alert.kind,
                severity = %alert.severity,
                "Alert {}: {}",
                alert.id,
                alert.message
            );
            self.dispatcher.dispatch(alert).await;
        }

        alerts
    }

    /// Send an event to current subscribers. Having none is not an error.
    pub fn publish(&self, event: MonitorEvent) {
        let _ = self.events.send(event);
    }

    /// Snapshot plus a receiver for every event after it.
    pub fn subscribe(&self) -> (DashboardSnapshot, broadcast::Receiver<MonitorEvent>) {
        let store = self.store.read();
        let snapshot = self.snapshot_of(&store);
        let rx = self.events.subscribe();
        (snapshot, rx)
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        let store = self.store.read();
        self.snapshot_of(&store)
    }

    fn snapshot_of(&self, store: &MetricsStore) -> DashboardSnapshot {
        DashboardSnapshot {
            generated_at: Utc::now(),
            targets: self.summaries_of(store),
            recent_alerts: store.recent_alerts(SNAPSHOT_ALERTS),
        }
    }

    fn summaries_of(&self, store: &MetricsStore) -> Vec<HealthSummary> {
        let evaluator = self.evaluator.lock();
        let mut summaries = store.summaries();
        for summary in &mut summaries {
            summary.alert_level = evaluator.highest_level(&summary.name);
        }
        summaries
    }

    /// Summary and the last `limit` samples of one target.
    pub fn target_detail(&self, name: &str, limit: usize) -> Option<TargetDetail> {
        let store = self.store.read();
        let mut summary = store.summary(name)?;
        summary.alert_level = self.evaluator.lock().highest_level(name);
        let history = store.recent_samples(name, limit).ok()?;
        Some(TargetDetail { summary, history })
    }

    /// Like [`target_detail`](Self::target_detail), but the history comes from
    /// the retained time series instead of the capped per-target history.
    pub fn target_range(&self, name: &str, since: DateTime<Utc>, limit: usize) -> Option<TargetDetail> {
        let store = self.store.read();
        let mut summary = store.summary(name)?;
        summary.alert_level = self.evaluator.lock().highest_level(name);
        let mut history = store.series_for(name, since).ok()?;
        let skip = history.len().saturating_sub(limit);
        history.drain(..skip);
        Some(TargetDetail { summary, history })
    }

    /// Most recent alerts, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.store.read().recent_alerts(limit)
    }

    pub fn report(&self) -> HealthReport {
        let store = self.store.read();
        HealthReport::from_summaries(self.summaries_of(&store))
    }

    pub fn target_count(&self) -> usize {
        self.store.read().target_count()
    }

    /// Drop time-series points older than the retention window.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut store = self.store.write();
        let cutoff = now - store.settings().retention;
        store.prune(cutoff)
    }

    pub fn export_snapshot(&self) -> StoreSnapshot {
        self.store.read().export_snapshot()
    }

    pub fn restore(&self, snapshot: StoreSnapshot) -> usize {
        self.store.write().restore(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertKind, AlertThresholds, Severity, ThresholdPair};
    use crate::monitor::DashboardMessage;
    use crate::store::{StoreSettings, Target};
    use crate::test_support::{ok_sample, status_sample};
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    fn collector(names: &[&str], thresholds: AlertThresholds) -> Collector {
        let targets: Vec<Target> = names
            .iter()
            .map(|n| Target::new(n, "http://localhost", Duration::from_secs(1)))
            .collect();
        let settings = StoreSettings::default();
        let evaluator = AlertEvaluator::new(
            thresholds,
            Duration::from_secs(300),
            settings.availability_window,
        );
        Collector::new(
            MetricsStore::new(&targets, settings),
            evaluator,
            Dispatcher::new(Vec::new(), Duration::from_secs(1)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_streak_fires_one_critical_alert() {
        let mut thresholds = AlertThresholds::default();
        thresholds.consecutive_failures = ThresholdPair {
            warning: 3.0,
            critical: 3.0,
        };
        let c = collector(&["API"], thresholds);

        let streak_alerts = |alerts: Vec<Alert>| -> Vec<Alert> {
            alerts
                .into_iter()
                .filter(|a| a.kind == AlertKind::ConsecutiveFailures)
                .collect()
        };

        assert!(streak_alerts(c.process("API", status_sample(500)).await).is_empty());
        assert!(streak_alerts(c.process("API", status_sample(500)).await).is_empty());
        let fired = streak_alerts(c.process("API", status_sample(500)).await);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].severity, Severity::Critical);
        assert_eq!(fired[0].value, 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_target_respects_cooldown() {
        let c = collector(&["API"], AlertThresholds::default());

        let fired = c.process("API", ok_sample(6000)).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, AlertKind::ResponseTime);
        assert_eq!(fired[0].severity, Severity::Critical);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(c.process("API", ok_sample(6000)).await.is_empty());

        tokio::time::advance(Duration::from_secs(241)).await;
        let fired = c.process("API", ok_sample(6000)).await;
        assert_eq!(fired.len(), 1);

        assert_eq!(c.recent_alerts(10).len(), 2);
        assert_eq!(c.snapshot().targets[0].alert_level, crate::alerts::AlertLevel::Critical);
    }

    #[tokio::test]
    async fn test_subscriber_sees_snapshot_then_new_samples() {
        let c = collector(&["Website", "API"], AlertThresholds::default());
        c.process("Website", ok_sample(10)).await;
        c.process("Website", ok_sample(12)).await;

        let (snapshot, mut rx) = c.subscribe();
        assert_eq!(snapshot.targets.len(), 2);
        assert_eq!(snapshot.targets[0].total_checks, 2);
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);

        c.process("API", ok_sample(20)).await;
        c.process("Website", ok_sample(30)).await;

        let first = DashboardMessage::from_event(rx.try_recv().unwrap()).unwrap();
        let second = DashboardMessage::from_event(rx.try_recv().unwrap()).unwrap();
        match (first, second) {
            (DashboardMessage::Metrics(a), DashboardMessage::Metrics(b)) => {
                assert_eq!(a.target, "API");
                assert_eq!(b.target, "Website");
                assert_eq!(b.summary.total_checks, 3);
            }
            other => panic!("unexpected messages: {:?}", other),
        }
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn test_alert_events_follow_sample_event() {
        let c = collector(&["API"], AlertThresholds::default());
        let (_, mut rx) = c.subscribe();

        c.process("API", ok_sample(3000)).await;

        assert!(matches!(rx.try_recv().unwrap(), MonitorEvent::SampleRecorded(_)));
        match rx.try_recv().unwrap() {
            MonitorEvent::AlertFired(alert) => assert_eq!(alert.severity, Severity::Warning),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_evaluation_error_still_records_sample() {
        let mut thresholds = AlertThresholds::default();
        thresholds.response_time.warning = f64::NAN;
        let c = collector(&["API"], thresholds);

        assert!(c.process("API", ok_sample(9000)).await.is_empty());
        let detail = c.target_detail("API", 10).unwrap();
        assert_eq!(detail.history.len(), 1);
        assert_eq!(detail.summary.total_checks, 1);
    }

    #[tokio::test]
    async fn test_unknown_target_is_dropped() {
        let c = collector(&["API"], AlertThresholds::default());
        let (_, mut rx) = c.subscribe();

        assert!(c.process("Ghost", status_sample(500)).await.is_empty());
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
        assert!(c.target_detail("Ghost", 10).is_none());
    }

    #[tokio::test]
    async fn test_prune_uses_retention() {
        let c = collector(&["API"], AlertThresholds::default());
        c.process("API", ok_sample(10)).await;

        assert_eq!(c.prune(Utc::now()), 0);
        assert_eq!(c.prune(Utc::now() + chrono::Duration::hours(25)), 1);
        // per-target history is untouched by pruning
        assert_eq!(c.target_detail("API", 10).unwrap().history.len(), 1);
    }
}
