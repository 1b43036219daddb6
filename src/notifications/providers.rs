// Channel providers for outbound notifications
//
// Email and SMS ride on external HTTP services; the assistant channel is a
// local auto-responder used as the last failover step so a customer-facing
// message is never silently dropped.

use async_trait::async_trait;
use serde_json::json;

use crate::gateway::ProviderCallError;
use crate::notifications::{Channel, OutboundNotification};

/// A single delivery channel
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, notification: &OutboundNotification) -> Result<(), ProviderCallError>;
}

fn classify_response(status: reqwest::StatusCode, body: String) -> ProviderCallError {
    if status.is_server_error() {
        ProviderCallError::Retryable(format!("{}: {}", status, body))
    } else {
        ProviderCallError::Fatal(format!("{}: {}", status, body))
    }
}

/// Email delivery over an HTTP relay
pub struct HttpEmailProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpEmailProvider {
    pub fn new(client: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl NotificationProvider for HttpEmailProvider {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, notification: &OutboundNotification) -> Result<(), ProviderCallError> {
        let url = format!("{}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "to": notification.recipient,
                "subject": notification.subject,
                "body": notification.body,
            }))
            .send()
            .await
            .map_err(|e| ProviderCallError::Retryable(format!("transport error: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_response(status, body))
        }
    }
}

/// SMS delivery over an HTTP relay
pub struct HttpSmsProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpSmsProvider {
    pub fn new(client: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl NotificationProvider for HttpSmsProvider {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, notification: &OutboundNotification) -> Result<(), ProviderCallError> {
        let url = format!("{}/sms", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "to": notification.recipient,
                "body": notification.body,
            }))
            .send()
            .await
            .map_err(|e| ProviderCallError::Retryable(format!("transport error: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_response(status, body))
        }
    }
}

/// Local auto-responder, the terminal failover channel
///
/// Always succeeds: it records the message in the application log where staff
/// tooling picks it up.
#[derive(Default)]
pub struct StaticAutoResponder;

impl StaticAutoResponder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationProvider for StaticAutoResponder {
    fn channel(&self) -> Channel {
        Channel::Assistant
    }

    async fn send(&self, notification: &OutboundNotification) -> Result<(), ProviderCallError> {
        tracing::info!(
            booking_id = %notification.booking_id,
            notification_type = %notification.notification_type,
            recipient = %notification.recipient,
            "auto-responder handled notification"
        );
        Ok(())
    }
}
