// External provider interfaces
//
// The calendar and payment providers are external collaborators; this module
// defines their interface boundary and the reqwest-backed adapters used in
// production. All calls are expected to run through the RateLimitedGateway.

mod http;

pub use http::{HttpCalendarProvider, HttpPaymentProvider};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gateway::ProviderCallError;

/// A free/busy window reported by the external calendar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Payment intent returned by the payment provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

/// External calendar provider boundary
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// `GET free-slots(calendarId, startTs, endTs, timezone)`
    async fn free_slots(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timezone: &str,
    ) -> Result<Vec<FreeWindow>, ProviderCallError>;

    /// `POST create-event` returning the external event id
    async fn create_event(
        &self,
        calendar_id: &str,
        resource_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        metadata: serde_json::Value,
    ) -> Result<String, ProviderCallError>;

    /// `DELETE event`
    async fn delete_event(
        &self,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), ProviderCallError>;
}

/// External payment provider boundary
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// `POST create-payment-intent`
    async fn create_payment_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        metadata: serde_json::Value,
    ) -> Result<PaymentIntent, ProviderCallError>;
}
