use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Payment event types delivered by the provider webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventType {
    PaymentSucceeded,
    PaymentFailed,
}

impl PaymentEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEventType::PaymentSucceeded => "payment_succeeded",
            PaymentEventType::PaymentFailed => "payment_failed",
        }
    }
}

impl std::fmt::Display for PaymentEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Webhook payload as delivered by the payment provider
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookEvent {
    pub event_id: String,
    pub event_type: PaymentEventType,
    pub payment_intent_id: String,
    pub amount_cents: Option<i64>,
    /// Decline reason, present on failure events
    pub reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Final disposition of a processed webhook event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProcessingOutcome {
    /// First sight recorded, application still underway
    Received,
    /// The booking transition was applied
    Applied,
    /// The booking had already moved past the transition this event carries
    Superseded,
    /// The event could not be applied and was dead-lettered
    Failed,
}

impl std::fmt::Display for ProcessingOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessingOutcome::Received => "received",
            ProcessingOutcome::Applied => "applied",
            ProcessingOutcome::Superseded => "superseded",
            ProcessingOutcome::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Persisted record keyed by provider event id
///
/// The unique key on `event_id` is what makes redelivery idempotent: only the
/// first sight of an event id applies a transition.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProcessedWebhookEvent {
    pub event_id: String,
    pub event_type: PaymentEventType,
    pub payment_intent_id: String,
    pub outcome: ProcessingOutcome,
    pub detail: Option<String>,
    pub processed_at: DateTime<Utc>,
}

/// What the webhook endpoint reports back for one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookDisposition {
    Applied,
    Duplicate,
    Superseded,
    Failed,
}
