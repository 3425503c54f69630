//! Notification delivery for workflow and directory events. Delivery is
//! fire-and-forget: a failed send is logged and counted but never fails the
//! operation that triggered it.

use crate::observability::metrics;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
pub struct NotificationMessage {
    /// Template name on the notification service side, e.g.
    /// "ticket-created", "user-activation", "password-reset".
    pub template: String,
    pub recipient_email: String,
    pub data: serde_json::Value,
}

#[async_trait]
pub trait NotificationClient: Send + Sync {
    async fn send(&self, message: NotificationMessage);
}

/// Posts notifications to the notification service.
pub struct RemoteNotificationClient {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteNotificationClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl NotificationClient for RemoteNotificationClient {
    async fn send(&self, message: NotificationMessage) {
        let url = format!("{}/notifications", self.base_url);
        match self.client.post(&url).json(&message).send().await {
            Ok(response) if response.status().is_success() => {
                metrics::clients::notification_sent();
            }
            Ok(response) => {
                metrics::clients::notification_failed();
                warn!(
                    "Notification service returned {} for template {}",
                    response.status(),
                    message.template
                );
            }
            Err(e) => {
                metrics::clients::notification_failed();
                warn!(
                    "Failed to send {} notification: {}",
                    message.template, e
                );
            }
        }
    }
}

/// Used when no notification service is configured.
#[derive(Default)]
pub struct LoggingNotificationClient;

#[async_trait]
impl NotificationClient for LoggingNotificationClient {
    async fn send(&self, message: NotificationMessage) {
        debug!(
            "Dropping {} notification to {} (no notification service configured)",
            message.template, message.recipient_email
        );
    }
}
