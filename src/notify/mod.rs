//! Alert notification fan-out.
//!
//! Delivery is best effort and at most once. A failing channel is logged and
//! reported in the returned results; it never affects other channels or the
//! poll cycle that produced the alert.

mod channels;

pub use channels::*;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::alerts::Alert;
use crate::config::NotificationsConfig;

/// Dispatch error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("channel task panicked: {0}")]
    Panicked(String),
}

/// A destination for alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn notify(&self, alert: &Alert) -> Result<(), DispatchError>;
}

/// Outcome of one channel for one alert.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelResult {
    pub channel: String,
    pub outcome: Result<(), DispatchError>,
}

/// Sends each alert to every enabled channel concurrently.
pub struct Dispatcher {
    channels: Vec<Arc<dyn Notifier>>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(channels: Vec<Arc<dyn Notifier>>, timeout: Duration) -> Self {
        Self { channels, timeout }
    }

    /// Build the enabled channels from configuration.
    pub fn from_config(config: &NotificationsConfig, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pulsewatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Notify: falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });

        let mut channels: Vec<Arc<dyn Notifier>> = Vec::new();
        if config.webhook.enabled {
            channels.push(Arc::new(WebhookNotifier::new(client.clone(), &config.webhook.url)));
        }
        if config.slack.enabled {
            channels.push(Arc::new(ChatNotifier::new(client.clone(), config.slack.clone())));
        }
        if config.email.enabled {
            channels.push(Arc::new(EmailNotifier::new(config.email.clone())));
        }

        let names: Vec<&str> = channels.iter().map(|c| c.name()).collect();
        tracing::info!("Notify: enabled channels: {:?}", names);

        Self::new(channels, timeout)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Deliver one alert to every channel. Results come back in channel order.
    pub async fn dispatch(&self, alert: &Alert) -> Vec<ChannelResult> {
        let handles: Vec<_> = self
            .channels
            .iter()
            .map(|channel| {
                let channel = Arc::clone(channel);
                let alert = alert.clone();
                let timeout = self.timeout;
                let name = channel.name().to_string();
                let handle = tokio::spawn(async move {
                    match tokio::time::timeout(timeout, channel.notify(&alert)).await {
                        Ok(result) => result,
                        Err(_) => Err(DispatchError::Timeout(timeout)),
                    }
                });
                (name, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (channel, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(DispatchError::Panicked(e.to_string())),
            };

            match &outcome {
                Ok(()) => tracing::debug!("Notify: alert {} delivered via {}", alert.id, channel),
                Err(e) => tracing::error!(
                    channel = %channel,
                    service = %alert.target,
                    "Notify: failed to deliver alert {}: {}",
                    alert.id,
                    e
                ),
            }
            results.push(ChannelResult { channel, outcome });
        }
        results
    }
}
