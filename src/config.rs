//! Configuration module for pulsewatch.
//!
//! Loads a JSON configuration file, then applies environment overrides.
//! All durations in the file are milliseconds.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::alerts::AlertThresholds;
use crate::store::{StoreSettings, Target};

pub const DEFAULT_CONFIG_PATH: &str = "pulsewatch.json";

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level monitor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub thresholds: AlertThresholds,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Notification channels. All disabled by default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationsConfig {
    pub webhook: WebhookConfig,
    pub slack: ChatConfig,
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: String,
}

/// Slack-style incoming webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatConfig {
    pub enabled: bool,
    pub webhook_url: String,
    pub channel: String,
    pub username: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: String::new(),
            channel: "#alerts".to_string(),
            username: "pulsewatch".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub from: String,
    pub to: Vec<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: String::new(),
            smtp_port: 587,
            username: String::new(),
            from: String::new(),
            to: Vec::new(),
        }
    }
}

/// Dashboard server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardConfig {
    pub port: u16,
    /// Client refresh interval for pull-based views, in milliseconds.
    pub refresh_interval: u64,
    /// How long samples stay in the time series.
    pub retention_hours: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            refresh_interval: 5000,
            retention_hours: 24,
        }
    }
}

/// Collector tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorSettings {
    pub probe_timeout: u64,
    pub history_limit: usize,
    pub availability_window: usize,
    pub alert_cooldown: u64,
    pub alert_history_limit: usize,
    pub prune_interval: u64,
    pub notification_timeout: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            probe_timeout: 10_000,
            history_limit: 1000,
            availability_window: 20,
            alert_cooldown: 300_000,
            alert_history_limit: 100,
            prune_interval: 60_000,
            notification_timeout: 5000,
        }
    }
}

impl MonitorSettings {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_millis(self.alert_cooldown)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval)
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_timeout)
    }
}

/// State file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub path: String,
    /// Snapshot interval in milliseconds.
    pub interval: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "pulsewatch-state.json".to_string(),
            interval: 60_000,
        }
    }
}

impl PersistenceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }
}

impl MonitorConfig {
    /// Load configuration from the file named by `PULSEWATCH_CONFIG`.
    ///
    /// Environment variables:
    /// - `PULSEWATCH_CONFIG`: configuration file (default: "pulsewatch.json")
    /// - `PULSEWATCH_HTTP_PORT`: dashboard port
    /// - `PULSEWATCH_STATE_PATH`: state file path, enables persistence
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("PULSEWATCH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut cfg = Self::from_file(&path)?;
        cfg.apply_overrides(|key| env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(data)?)
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port_str) = lookup("PULSEWATCH_HTTP_PORT") {
            match port_str.parse() {
                Ok(port) => self.dashboard.port = port,
                Err(_) => tracing::warn!("Ignoring invalid PULSEWATCH_HTTP_PORT: {}", port_str),
            }
        }

        if let Some(state_path) = lookup("PULSEWATCH_STATE_PATH") {
            self.persistence.enabled = true;
            self.persistence.path = state_path;
        }
    }

    /// Check everything that must hold before the scheduler starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::Invalid("no targets configured".to_string()));
        }

        let mut names = HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(ConfigError::Invalid("target name cannot be empty".to_string()));
            }
            if !names.insert(target.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate target name: {}", target.name)));
            }
            if target.interval_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "target {}: interval must be greater than zero",
                    target.name
                )));
            }
            match reqwest::Url::parse(&target.url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => {
                    return Err(ConfigError::Invalid(format!(
                        "target {}: unsupported scheme {}",
                        target.name,
                        url.scheme()
                    )))
                }
                Err(e) => {
                    return Err(ConfigError::Invalid(format!(
                        "target {}: invalid url {}: {}",
                        target.name, target.url, e
                    )))
                }
            }
        }

        if self.monitor.probe_timeout == 0 {
            return Err(ConfigError::Invalid("probeTimeout must be greater than zero".to_string()));
        }
        if self.monitor.prune_interval == 0 || (self.persistence.enabled && self.persistence.interval == 0) {
            return Err(ConfigError::Invalid("timer intervals must be greater than zero".to_string()));
        }

        let n = &self.notifications;
        if n.webhook.enabled && n.webhook.url.is_empty() {
            return Err(ConfigError::Invalid("webhook enabled without url".to_string()));
        }
        if n.slack.enabled && n.slack.webhook_url.is_empty() {
            return Err(ConfigError::Invalid("slack enabled without webhookUrl".to_string()));
        }
        if n.email.enabled && n.email.to.is_empty() {
            return Err(ConfigError::Invalid("email enabled without recipients".to_string()));
        }

        Ok(())
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            history_limit: self.monitor.history_limit.max(1),
            availability_window: self.monitor.availability_window.max(1),
            retention: chrono::Duration::hours(self.dashboard.retention_hours as i64),
            alert_history_limit: self.monitor.alert_history_limit,
        }
    }
}
