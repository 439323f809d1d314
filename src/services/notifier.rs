//! Out-of-band alerts for suspicious session activity.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Event tag sent when a refresh arrives from a new network origin.
pub const EVENT_NEW_IP: &str = "new_ip";

/// Outbound request timeout for webhook delivery.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// A session anomaly worth alerting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    /// The identity whose session was refreshed.
    #[serde(rename = "user_id")]
    pub identity: String,
    /// The device fingerprint the refresh was presented with.
    #[serde(rename = "user_agent")]
    pub device_fingerprint: String,
    /// The new network origin.
    #[serde(rename = "ip")]
    pub network_origin: String,
    /// What happened.
    pub event: String,
}

impl AnomalyEvent {
    /// A refresh from an origin other than the one recorded at issuance.
    pub fn new_ip(identity: &str, device_fingerprint: &str, network_origin: &str) -> Self {
        Self {
            identity: identity.to_string(),
            device_fingerprint: device_fingerprint.to_string(),
            network_origin: network_origin.to_string(),
            event: EVENT_NEW_IP.to_string(),
        }
    }
}

/// Delivers anomaly events to an alerting collaborator.
#[async_trait]
pub trait AnomalyNotifier: Send + Sync {
    async fn notify(&self, event: &AnomalyEvent) -> Result<()>;
}

/// Posts events as JSON to a configured endpoint.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Creates a new `WebhookNotifier`.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AnomalyNotifier for WebhookNotifier {
    async fn notify(&self, event: &AnomalyEvent) -> Result<()> {
        let payload = sonic_rs::to_string(event)
            .map_err(|e| AppError::Internal(format!("Event serialization failed: {}", e)))?;

        self.client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?
            .error_for_status()?;

        tracing::debug!("📨 Webhook delivered: {} for {}", event.event, event.identity);
        Ok(())
    }
}

/// Writes events to the log only. Used when no webhook is configured.
#[derive(Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl AnomalyNotifier for LogNotifier {
    async fn notify(&self, event: &AnomalyEvent) -> Result<()> {
        tracing::warn!(
            identity = %event.identity,
            device = %event.device_fingerprint,
            origin = %event.network_origin,
            "⚠️ Session anomaly: {}",
            event.event
        );
        Ok(())
    }
}

/// Fires `event` on a detached task.
///
/// The caller never awaits the outcome; failures end up in the log.
pub fn dispatch(notifier: Arc<dyn AnomalyNotifier>, event: AnomalyEvent) {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&event).await {
            tracing::error!("❌ Failed to send anomaly notification: {}", e);
        }
    });
}
