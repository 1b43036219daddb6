use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Delivery channel for an outbound notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Assistant,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    BookingConfirmed,
    BookingCancelled,
    PaymentFailed,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::BookingConfirmed => "booking_confirmed",
            NotificationType::BookingCancelled => "booking_cancelled",
            NotificationType::PaymentFailed => "payment_failed",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivery state of an outbound notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A notification handed to the dispatcher
///
/// `skip_duplicate_check` bypasses the dedup window for resends explicitly
/// requested by staff.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub booking_id: Uuid,
    pub notification_type: NotificationType,
    pub recipient_email: Option<String>,
    pub recipient_phone: Option<String>,
    pub subject: String,
    pub body: String,
    pub skip_duplicate_check: bool,
}

/// Persisted record of one delivery attempt chain
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OutboundNotification {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub notification_type: NotificationType,
    pub channel: Channel,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub status: NotificationStatus,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A notification that exhausted every channel, kept for manual follow-up
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub notification_type: NotificationType,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}
