// reqwest adapters for the calendar and payment providers
//
// Response classification: 5xx and transport failures are retryable (the
// gateway owns the retry loop), 4xx responses are fatal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::{CalendarProvider, FreeWindow, PaymentIntent, PaymentProvider};
use crate::gateway::ProviderCallError;

fn classify_status(status: StatusCode, body: String) -> ProviderCallError {
    if status.is_server_error() {
        ProviderCallError::Retryable(format!("{}: {}", status, body))
    } else {
        ProviderCallError::Fatal(format!("{}: {}", status, body))
    }
}

fn transport_error(err: reqwest::Error) -> ProviderCallError {
    ProviderCallError::Retryable(format!("transport error: {}", err))
}

/// Calendar provider adapter speaking the §6 wire shapes
#[derive(Debug, Clone)]
pub struct HttpCalendarProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct FreeSlotsResponse {
    slots: Vec<FreeWindow>,
}

#[derive(Debug, Deserialize)]
struct CreateEventResponse {
    event_id: String,
}

impl HttpCalendarProvider {
    pub fn new(client: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl CalendarProvider for HttpCalendarProvider {
    async fn free_slots(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timezone: &str,
    ) -> Result<Vec<FreeWindow>, ProviderCallError> {
        let url = format!("{}/calendars/{}/free-slots", self.base_url, calendar_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&[
                ("startTs", start.to_rfc3339()),
                ("endTs", end.to_rfc3339()),
                ("timezone", timezone.to_string()),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let parsed: FreeSlotsResponse = response
            .json()
            .await
            .map_err(|e| ProviderCallError::Fatal(format!("malformed free-slots response: {}", e)))?;
        Ok(parsed.slots)
    }

    async fn create_event(
        &self,
        calendar_id: &str,
        resource_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        metadata: serde_json::Value,
    ) -> Result<String, ProviderCallError> {
        let url = format!("{}/calendars/{}/events", self.base_url, calendar_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "resourceId": resource_id,
                "start": start.to_rfc3339(),
                "end": end.to_rfc3339(),
                "metadata": metadata,
            }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let parsed: CreateEventResponse = response
            .json()
            .await
            .map_err(|e| ProviderCallError::Fatal(format!("malformed create-event response: {}", e)))?;
        Ok(parsed.event_id)
    }

    async fn delete_event(
        &self,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), ProviderCallError> {
        let url = format!(
            "{}/calendars/{}/events/{}",
            self.base_url, calendar_id, event_id
        );
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        // Deleting an already-deleted event is treated as success
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, body))
    }
}

/// Payment provider adapter
#[derive(Debug, Clone)]
pub struct HttpPaymentProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpPaymentProvider {
    pub fn new(client: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn create_payment_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        metadata: serde_json::Value,
    ) -> Result<PaymentIntent, ProviderCallError> {
        let url = format!("{}/payment-intents", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "amountCents": amount_cents,
                "currency": currency,
                "metadata": metadata,
            }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        #[derive(Deserialize)]
        struct IntentResponse {
            id: String,
            #[serde(rename = "clientSecret")]
            client_secret: String,
        }

        let parsed: IntentResponse = response.json().await.map_err(|e| {
            ProviderCallError::Fatal(format!("malformed payment-intent response: {}", e))
        })?;
        Ok(PaymentIntent {
            id: parsed.id,
            client_secret: parsed.client_secret,
        })
    }
}
