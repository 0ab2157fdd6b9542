//! Concrete notification channels.

use async_trait::async_trait;
use serde_json::json;

use super::{DispatchError, Notifier};
use crate::alerts::{Alert, Severity};
use crate::config::{ChatConfig, EmailConfig};

/// POSTs the alert as JSON to a URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, alert: &Alert) -> Result<(), DispatchError> {
        post_json(&self.client, &self.url, json!(alert)).await
    }
}

/// Slack-style incoming webhook.
pub struct ChatNotifier {
    client: reqwest::Client,
    config: ChatConfig,
}

impl ChatNotifier {
    pub fn new(client: reqwest::Client, config: ChatConfig) -> Self {
        Self { client, config }
    }

    fn payload(&self, alert: &Alert) -> serde_json::Value {
        let (icon, color) = match alert.severity {
            Severity::Critical => (":red_circle:", "danger"),
            Severity::Warning => (":warning:", "warning"),
        };

        json!({
            "channel": self.config.channel,
            "username": self.config.username,
            "text": format!("{} {}", icon, headline(alert)),
            "attachments": [{
                "color": color,
                "fields": [
                    {"title": "Target", "value": alert.target, "short": true},
                    {"title": "Rule", "value": alert.kind.to_string(), "short": true},
                    {"title": "Value", "value": format!("{:.2}", alert.value), "short": true},
                    {"title": "Threshold", "value": format!("{:.2}", alert.threshold), "short": true},
                ],
                "ts": alert.timestamp.timestamp(),
            }],
        })
    }
}

#[async_trait]
impl Notifier for ChatNotifier {
    fn name(&self) -> &str {
        "slack"
    }

    async fn notify(&self, alert: &Alert) -> Result<(), DispatchError> {
        let payload = self.payload(alert);
        post_json(&self.client, &self.config.webhook_url, payload).await
    }
}

/// Email channel without a transport: logs the message it would send.
pub struct EmailNotifier {
    config: EmailConfig,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    async fn notify(&self, alert: &Alert) -> Result<(), DispatchError> {
        tracing::info!(
            from = %self.config.from,
            smtp = %format!("{}:{}", self.config.smtp_host, self.config.smtp_port),
            "Email: would send \"{}\" to {}",
            headline(alert),
            self.config.to.join(", ")
        );
        Ok(())
    }
}

fn headline(alert: &Alert) -> String {
    format!(
        "[{}] {}: {}",
        alert.severity.to_string().to_uppercase(),
        alert.target,
        alert.message
    )
}

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    payload: serde_json::Value,
) -> Result<(), DispatchError> {
    let response = client
        .post(url)
        .json(&payload)
        .send()
        .await
        .map_err(|e| DispatchError::Request(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(DispatchError::Status(status.as_u16()))
    }
}
