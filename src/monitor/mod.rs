//! Process-scoped monitor: wires the collector, scheduler and retention timer.

mod collector;
mod events;

pub use collector::*;
pub use events::*;

use chrono::Utc;
use std::sync::Arc;

use crate::config::{ConfigError, MonitorConfig};
use crate::probe::{HttpProber, Prober};
use crate::scheduler::{RetentionManager, Scheduler, SchedulerError};
use crate::store::StateFile;

/// One running instance of the health monitor.
///
/// Created once at startup and shared with the web layer. Tests create as
/// many independent instances as they need.
pub struct Monitor {
    config: MonitorConfig,
    collector: Arc<Collector>,
    scheduler: Scheduler,
    retention: RetentionManager,
}

impl Monitor {
    /// Build a monitor that probes over real HTTP.
    pub fn init(config: MonitorConfig) -> Result<Self, ConfigError> {
        Self::with_prober(config, Arc::new(HttpProber::new()))
    }

    pub fn with_prober(config: MonitorConfig, prober: Arc<dyn Prober>) -> Result<Self, ConfigError> {
        config.validate()?;
        if let Err(e) = config.thresholds.validate() {
            tracing::warn!("Monitor: {}; alert evaluation will be skipped", e);
        }

        let collector = Arc::new(Collector::from_config(&config));

        let state_file = if config.persistence.enabled {
            let file = Arc::new(StateFile::new(&config.persistence.path));
            match file.load() {
                Ok(Some(snapshot)) => {
                    let restored = collector.restore(snapshot);
                    tracing::info!(
                        "Monitor: Restored {} targets from {}",
                        restored,
                        file.path().display()
                    );
                }
                Ok(None) => tracing::info!("Monitor: No saved state at {}", file.path().display()),
                Err(e) => tracing::warn!(
                    "Monitor: Ignoring state file {}: {}",
                    file.path().display(),
                    e
                ),
            }
            Some(file)
        } else {
            None
        };

        let scheduler = Scheduler::new(
            config.targets.clone(),
            prober,
            Arc::clone(&collector),
            config.monitor.probe_timeout(),
        );
        let retention = RetentionManager::new(
            Arc::clone(&collector),
            state_file,
            config.monitor.prune_interval(),
            config.persistence.interval(),
        );

        Ok(Self {
            config,
            collector,
            scheduler,
            retention,
        })
    }

    pub fn collector(&self) -> Arc<Collector> {
        Arc::clone(&self.collector)
    }

    /// Start polling. Returns `Ok(false)` when already running.
    pub async fn start(&self) -> Result<bool, SchedulerError> {
        if !self.scheduler.start().await? {
            return Ok(false);
        }
        self.retention.start();
        self.collector.publish(MonitorEvent::ServiceStarted {
            at: Utc::now(),
            targets: self.config.targets.len(),
        });
        tracing::info!("Monitor started with {} targets", self.config.targets.len());
        Ok(true)
    }

    /// Stop polling and flush state. Safe to call more than once.
    pub async fn shutdown(&self) {
        if !self.scheduler.stop().await {
            return;
        }
        self.retention.stop().await;
        self.collector.publish(MonitorEvent::ServiceStopped { at: Utc::now() });
        tracing::info!("Monitor stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.scheduler.is_running().await
    }
}
