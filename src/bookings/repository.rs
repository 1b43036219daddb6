use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::bookings::error::BookingError;
use crate::bookings::{Booking, BookingStatus, DepositStatus};
use crate::models::Slot;

const BOOKING_COLUMNS: &str = "id, service_id, resource_id, slot_start, slot_end, status, \
     deposit_status, base_price_cents, travel_fee_cents, discount_cents, deposit_cents, \
     total_cents, promo_code, distance_miles, customer_name, customer_email, customer_phone, \
     customer_address, external_payment_intent_id, external_calendar_event_id, \
     cancellation_reason, created_at, updated_at";

/// Storage boundary for bookings
///
/// `insert_reserved` is the concurrency point: it must atomically verify that
/// no slot-occupying booking overlaps the new one on the same resource and
/// insert, so that of two racing requests exactly one succeeds. The occupied
/// interval runs to the slot end plus the configured buffer, so back-to-back
/// bookings inside the buffer lose the race too.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Atomic check-and-insert. Fails with `SlotNoLongerAvailable` when an
    /// active booking's buffer-padded interval overlaps the new one on the
    /// same resource.
    async fn insert_reserved(&self, booking: Booking) -> Result<Booking, BookingError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Booking>, BookingError>;

    async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Booking>, BookingError>;

    /// Slots of slot-occupying bookings for a resource within a window
    async fn active_slots_in_range(
        &self,
        resource_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Slot>, BookingError>;

    /// Compare-and-swap status update: succeeds only when the stored status
    /// still equals `expected`.
    async fn transition_status(
        &self,
        id: Uuid,
        expected: BookingStatus,
        next: BookingStatus,
    ) -> Result<Booking, BookingError>;

    /// Compare-and-swap cancellation, recording the reason
    async fn cancel(
        &self,
        id: Uuid,
        expected: BookingStatus,
        next: BookingStatus,
        reason: Option<&str>,
    ) -> Result<Booking, BookingError>;

    /// Record the external payment-intent and calendar-event ids
    async fn set_external_refs(
        &self,
        id: Uuid,
        payment_intent_id: Option<&str>,
        calendar_event_id: Option<&str>,
    ) -> Result<Booking, BookingError>;

    /// Compare-and-swap confirmation that marks the deposit paid in the same
    /// write, so a confirmed booking is never observed with an unpaid deposit.
    async fn confirm_deposit_paid(
        &self,
        id: Uuid,
        expected: BookingStatus,
    ) -> Result<Booking, BookingError>;
}

/// In-memory booking store
///
/// A single lock spans the check and the insert, which gives the same
/// one-winner guarantee the production exclusion constraint provides.
#[derive(Default)]
pub struct InMemoryBookingStore {
    bookings: Mutex<HashMap<Uuid, Booking>>,
    buffer_minutes: i64,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer(buffer_minutes: i64) -> Self {
        Self {
            bookings: Mutex::default(),
            buffer_minutes: buffer_minutes.max(0),
        }
    }

    fn padded(&self, slot: Slot) -> Slot {
        Slot {
            start: slot.start,
            end: slot.end + chrono::Duration::minutes(self.buffer_minutes),
        }
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn insert_reserved(&self, booking: Booking) -> Result<Booking, BookingError> {
        let mut bookings = self.bookings.lock().await;
        let slot = self.padded(booking.slot());
        let conflict = bookings.values().any(|existing| {
            existing.resource_id == booking.resource_id
                && existing.status.occupies_slot()
                && self.padded(existing.slot()).overlaps(&slot)
        });
        if conflict {
            return Err(BookingError::SlotNoLongerAvailable);
        }
        bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Booking>, BookingError> {
        Ok(self.bookings.lock().await.get(&id).cloned())
    }

    async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Booking>, BookingError> {
        Ok(self
            .bookings
            .lock()
            .await
            .values()
            .find(|b| b.external_payment_intent_id.as_deref() == Some(payment_intent_id))
            .cloned())
    }

    async fn active_slots_in_range(
        &self,
        resource_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Slot>, BookingError> {
        let window = Slot { start: from, end: to };
        let mut slots: Vec<Slot> = self
            .bookings
            .lock()
            .await
            .values()
            .filter(|b| {
                b.resource_id == resource_id
                    && b.status.occupies_slot()
                    && b.slot().overlaps(&window)
            })
            .map(|b| b.slot())
            .collect();
        slots.sort_by_key(|s| s.start);
        Ok(slots)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        expected: BookingStatus,
        next: BookingStatus,
    ) -> Result<Booking, BookingError> {
        let mut bookings = self.bookings.lock().await;
        let booking = bookings.get_mut(&id).ok_or(BookingError::NotFound)?;
        if booking.status != expected {
            return Err(BookingError::StaleTransition {
                expected: expected.to_string(),
                actual: booking.status.to_string(),
            });
        }
        booking.status = next;
        booking.updated_at = Utc::now();
        Ok(booking.clone())
    }

    async fn cancel(
        &self,
        id: Uuid,
        expected: BookingStatus,
        next: BookingStatus,
        reason: Option<&str>,
    ) -> Result<Booking, BookingError> {
        let mut bookings = self.bookings.lock().await;
        let booking = bookings.get_mut(&id).ok_or(BookingError::NotFound)?;
        if booking.status != expected {
            return Err(BookingError::StaleTransition {
                expected: expected.to_string(),
                actual: booking.status.to_string(),
            });
        }
        booking.status = next;
        booking.cancellation_reason = reason.map(|r| r.to_string());
        booking.updated_at = Utc::now();
        Ok(booking.clone())
    }

    async fn set_external_refs(
        &self,
        id: Uuid,
        payment_intent_id: Option<&str>,
        calendar_event_id: Option<&str>,
    ) -> Result<Booking, BookingError> {
        let mut bookings = self.bookings.lock().await;
        let booking = bookings.get_mut(&id).ok_or(BookingError::NotFound)?;
        if let Some(intent) = payment_intent_id {
            booking.external_payment_intent_id = Some(intent.to_string());
        }
        if let Some(event) = calendar_event_id {
            booking.external_calendar_event_id = Some(event.to_string());
        }
        booking.updated_at = Utc::now();
        Ok(booking.clone())
    }

    async fn confirm_deposit_paid(
        &self,
        id: Uuid,
        expected: BookingStatus,
    ) -> Result<Booking, BookingError> {
        let mut bookings = self.bookings.lock().await;
        let booking = bookings.get_mut(&id).ok_or(BookingError::NotFound)?;
        if booking.status != expected {
            return Err(BookingError::StaleTransition {
                expected: expected.to_string(),
                actual: booking.status.to_string(),
            });
        }
        booking.status = BookingStatus::Confirmed;
        booking.deposit_status = DepositStatus::Paid;
        booking.updated_at = Utc::now();
        Ok(booking.clone())
    }
}

/// PostgreSQL booking store
///
/// Overlap protection comes from a partial exclusion constraint over the
/// buffer-padded slot range of slot-occupying statuses; a violation surfaces
/// as `SlotNoLongerAvailable` through the error conversion.
#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
    buffer_minutes: i64,
}

impl PgBookingStore {
    pub fn new(pool: PgPool, buffer_minutes: i64) -> Self {
        Self {
            pool,
            buffer_minutes: buffer_minutes.max(0),
        }
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn insert_reserved(&self, booking: Booking) -> Result<Booking, BookingError> {
        // slot_end_padded feeds the exclusion constraint, extending the
        // occupied range by the buffer
        let slot_end_padded =
            booking.slot_end + chrono::Duration::minutes(self.buffer_minutes);
        let inserted = sqlx::query_as::<_, Booking>(&format!(
            r#"
            INSERT INTO bookings (
                id, service_id, resource_id, slot_start, slot_end, slot_end_padded,
                status, deposit_status, base_price_cents, travel_fee_cents,
                discount_cents, deposit_cents, total_cents, promo_code,
                distance_miles, customer_name, customer_email, customer_phone,
                customer_address, external_payment_intent_id,
                external_calendar_event_id, cancellation_reason, created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(booking.id)
        .bind(&booking.service_id)
        .bind(&booking.resource_id)
        .bind(booking.slot_start)
        .bind(booking.slot_end)
        .bind(slot_end_padded)
        .bind(booking.status)
        .bind(booking.deposit_status)
        .bind(booking.base_price_cents)
        .bind(booking.travel_fee_cents)
        .bind(booking.discount_cents)
        .bind(booking.deposit_cents)
        .bind(booking.total_cents)
        .bind(&booking.promo_code)
        .bind(booking.distance_miles)
        .bind(&booking.customer_name)
        .bind(&booking.customer_email)
        .bind(&booking.customer_phone)
        .bind(&booking.customer_address)
        .bind(&booking.external_payment_intent_id)
        .bind(&booking.external_calendar_event_id)
        .bind(&booking.cancellation_reason)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(inserted)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Booking>, BookingError> {
        let booking = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {} FROM bookings WHERE id = $1",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(booking)
    }

    async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Booking>, BookingError> {
        let booking = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {} FROM bookings WHERE external_payment_intent_id = $1",
            BOOKING_COLUMNS
        ))
        .bind(payment_intent_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(booking)
    }

    async fn active_slots_in_range(
        &self,
        resource_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Slot>, BookingError> {
        let rows: Vec<(DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT slot_start, slot_end
            FROM bookings
            WHERE resource_id = $1
              AND status IN ('requested', 'pending_payment', 'confirmed', 'in_progress')
              AND slot_start < $3
              AND slot_end > $2
            ORDER BY slot_start
            "#,
        )
        .bind(resource_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(start, end)| Slot { start, end })
            .collect())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        expected: BookingStatus,
        next: BookingStatus,
    ) -> Result<Booking, BookingError> {
        let updated = sqlx::query_as::<_, Booking>(&format!(
            r#"
            UPDATE bookings
            SET status = $1, updated_at = NOW()
            WHERE id = $2 AND status = $3
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(next)
        .bind(id)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(booking) => Ok(booking),
            None => {
                // Distinguish a missing booking from a lost race
                let actual: Option<BookingStatus> =
                    sqlx::query_scalar("SELECT status FROM bookings WHERE id = $1")
                        .bind(id)
                        .fetch_optional(&self.pool)
                        .await?;
                match actual {
                    Some(status) => Err(BookingError::StaleTransition {
                        expected: expected.to_string(),
                        actual: status.to_string(),
                    }),
                    None => Err(BookingError::NotFound),
                }
            }
        }
    }

    async fn cancel(
        &self,
        id: Uuid,
        expected: BookingStatus,
        next: BookingStatus,
        reason: Option<&str>,
    ) -> Result<Booking, BookingError> {
        let updated = sqlx::query_as::<_, Booking>(&format!(
            r#"
            UPDATE bookings
            SET status = $1, cancellation_reason = $2, updated_at = NOW()
            WHERE id = $3 AND status = $4
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(next)
        .bind(reason)
        .bind(id)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(booking) => Ok(booking),
            None => {
                let actual: Option<BookingStatus> =
                    sqlx::query_scalar("SELECT status FROM bookings WHERE id = $1")
                        .bind(id)
                        .fetch_optional(&self.pool)
                        .await?;
                match actual {
                    Some(status) => Err(BookingError::StaleTransition {
                        expected: expected.to_string(),
                        actual: status.to_string(),
                    }),
                    None => Err(BookingError::NotFound),
                }
            }
        }
    }

    async fn set_external_refs(
        &self,
        id: Uuid,
        payment_intent_id: Option<&str>,
        calendar_event_id: Option<&str>,
    ) -> Result<Booking, BookingError> {
        let updated = sqlx::query_as::<_, Booking>(&format!(
            r#"
            UPDATE bookings
            SET external_payment_intent_id = COALESCE($1, external_payment_intent_id),
                external_calendar_event_id = COALESCE($2, external_calendar_event_id),
                updated_at = NOW()
            WHERE id = $3
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(payment_intent_id)
        .bind(calendar_event_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(BookingError::NotFound)?;

        Ok(updated)
    }

    async fn confirm_deposit_paid(
        &self,
        id: Uuid,
        expected: BookingStatus,
    ) -> Result<Booking, BookingError> {
        let updated = sqlx::query_as::<_, Booking>(&format!(
            r#"
            UPDATE bookings
            SET status = $1, deposit_status = $2, updated_at = NOW()
            WHERE id = $3 AND status = $4
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(BookingStatus::Confirmed)
        .bind(DepositStatus::Paid)
        .bind(id)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(booking) => Ok(booking),
            None => {
                let actual: Option<BookingStatus> =
                    sqlx::query_scalar("SELECT status FROM bookings WHERE id = $1")
                        .bind(id)
                        .fetch_optional(&self.pool)
                        .await?;
                match actual {
                    Some(status) => Err(BookingError::StaleTransition {
                        expected: expected.to_string(),
                        actual: status.to_string(),
                    }),
                    None => Err(BookingError::NotFound),
                }
            }
        }
    }
}
