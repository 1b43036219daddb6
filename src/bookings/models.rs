use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::{Role, Slot};
use crate::pricing::Quote;

/// Booking status enum representing the lifecycle of a booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Requested,
    PendingPayment,
    Confirmed,
    InProgress,
    Completed,
    CancelledByClient,
    CancelledByStaff,
    FailedPayment,
}

impl BookingStatus {
    /// Convert status to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Requested => "requested",
            BookingStatus::PendingPayment => "pending_payment",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::CancelledByClient => "cancelled_by_client",
            BookingStatus::CancelledByStaff => "cancelled_by_staff",
            BookingStatus::FailedPayment => "failed_payment",
        }
    }

    /// Parse status from string
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "requested" => Ok(BookingStatus::Requested),
            "pending_payment" => Ok(BookingStatus::PendingPayment),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "in_progress" => Ok(BookingStatus::InProgress),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled_by_client" => Ok(BookingStatus::CancelledByClient),
            "cancelled_by_staff" => Ok(BookingStatus::CancelledByStaff),
            "failed_payment" => Ok(BookingStatus::FailedPayment),
            _ => Err(format!("Invalid booking status: {}", s)),
        }
    }

    /// Statuses that hold the slot against competing bookings
    pub fn occupies_slot(&self) -> bool {
        matches!(
            self,
            BookingStatus::Requested
                | BookingStatus::PendingPayment
                | BookingStatus::Confirmed
                | BookingStatus::InProgress
        )
    }

    /// Terminal statuses admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed
                | BookingStatus::CancelledByClient
                | BookingStatus::CancelledByStaff
                | BookingStatus::FailedPayment
        )
    }
}

impl Default for BookingStatus {
    fn default() -> Self {
        BookingStatus::Requested
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Deposit status tracked alongside the booking status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    Unpaid,
    Paid,
    Refunded,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Unpaid => "unpaid",
            DepositStatus::Paid => "paid",
            DepositStatus::Refunded => "refunded",
        }
    }
}

impl Default for DepositStatus {
    fn default() -> Self {
        DepositStatus::Unpaid
    }
}

impl std::fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Domain model representing a booking
///
/// Price figures are the snapshot taken at creation time; later edits to the
/// service configuration never touch them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub id: Uuid,
    pub service_id: String,
    pub resource_id: String,
    pub slot_start: DateTime<Utc>,
    pub slot_end: DateTime<Utc>,
    pub status: BookingStatus,
    pub deposit_status: DepositStatus,
    pub base_price_cents: i64,
    pub travel_fee_cents: i64,
    pub discount_cents: i64,
    pub deposit_cents: i64,
    pub total_cents: i64,
    pub promo_code: Option<String>,
    pub distance_miles: f64,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub customer_address: String,
    pub external_payment_intent_id: Option<String>,
    pub external_calendar_event_id: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn slot(&self) -> Slot {
        Slot {
            start: self.slot_start,
            end: self.slot_end,
        }
    }

    pub fn quote(&self) -> Quote {
        Quote {
            base_price_cents: self.base_price_cents,
            travel_fee_cents: self.travel_fee_cents,
            discount_cents: self.discount_cents,
            deposit_cents: self.deposit_cents,
            total_cents: self.total_cents,
        }
    }
}

/// Request DTO for creating a booking
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateBookingRequest {
    #[validate(length(min = 1, message = "Service id is required"))]
    pub service_id: String,
    #[validate(length(min = 1, message = "Resource id is required"))]
    pub resource_id: String,
    pub slot_start: DateTime<Utc>,
    pub slot_end: DateTime<Utc>,
    #[validate(length(min = 1, max = 200, message = "Customer name is required"))]
    pub customer_name: String,
    #[validate(email(message = "A valid email address is required"))]
    pub customer_email: String,
    pub customer_phone: Option<String>,
    #[validate(length(min = 1, max = 500, message = "Service address is required"))]
    pub customer_address: String,
    pub distance_miles: f64,
    pub promo_code: Option<String>,
}

/// Request DTO for cancelling a booking
///
/// The caller role is resolved by the access layer and passed through; it
/// selects which cancellation branch the booking takes.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CancelBookingRequest {
    pub role: Role,
    pub reason: Option<String>,
}

/// Request DTO for staff-driven status updates (start / complete)
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateBookingStatusRequest {
    pub status: BookingStatus,
}

/// Response DTO for a booking
#[derive(Debug, Serialize, ToSchema)]
pub struct BookingResponse {
    pub id: Uuid,
    pub service_id: String,
    pub resource_id: String,
    pub slot_start: DateTime<Utc>,
    pub slot_end: DateTime<Utc>,
    pub status: BookingStatus,
    pub deposit_status: DepositStatus,
    pub price: Quote,
    pub promo_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_client_secret: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookingResponse {
    pub fn from_booking(booking: Booking, payment_client_secret: Option<String>) -> Self {
        let price = booking.quote();
        Self {
            id: booking.id,
            service_id: booking.service_id,
            resource_id: booking.resource_id,
            slot_start: booking.slot_start,
            slot_end: booking.slot_end,
            status: booking.status,
            deposit_status: booking.deposit_status,
            price,
            promo_code: booking.promo_code,
            payment_client_secret,
            cancellation_reason: booking.cancellation_reason,
            created_at: booking.created_at,
            updated_at: booking.updated_at,
        }
    }
}
