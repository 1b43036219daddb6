use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::availability::AvailabilityResolver;
use crate::bookings::{
    Booking, BookingError, BookingStatus, BookingStore, CancelBookingRequest,
    CreateBookingRequest, DepositStatus, StatusMachine,
};
use crate::error::ApiError;
use crate::gateway::{GatewayError, QueuePolicy, RateLimitedGateway};
use crate::models::{PromoCode, ServiceCatalog, Slot};
use crate::notifications::{NotificationRequest, NotificationSender, NotificationType};
use crate::pricing::PricingEngine;
use crate::providers::{CalendarProvider, PaymentProvider};
use crate::validation::validate_distance_miles;

/// Service for booking business logic
///
/// Owns the full creation sequence: revalidate the slot, price it, reserve it
/// atomically, then provision the external calendar event and payment intent.
/// Provider failures after the reserve are compensated by cancelling the
/// booking so the slot is released.
pub struct BookingService {
    store: Arc<dyn BookingStore>,
    resolver: Arc<AvailabilityResolver>,
    catalog: ServiceCatalog,
    promos: HashMap<String, PromoCode>,
    calendar: Arc<dyn CalendarProvider>,
    payments: Arc<dyn PaymentProvider>,
    gateway: Arc<RateLimitedGateway>,
    notifier: NotificationSender,
    calendar_id: String,
    currency: String,
}

impl BookingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn BookingStore>,
        resolver: Arc<AvailabilityResolver>,
        catalog: ServiceCatalog,
        promos: HashMap<String, PromoCode>,
        calendar: Arc<dyn CalendarProvider>,
        payments: Arc<dyn PaymentProvider>,
        gateway: Arc<RateLimitedGateway>,
        notifier: NotificationSender,
        calendar_id: String,
    ) -> Self {
        Self {
            store,
            resolver,
            catalog,
            promos,
            calendar,
            payments,
            gateway,
            notifier,
            calendar_id,
            currency: "usd".to_string(),
        }
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    pub fn promo(&self, code: &str) -> Option<&PromoCode> {
        self.promos.get(&code.to_uppercase())
    }

    /// Create a booking
    ///
    /// Returns the stored booking together with the payment client secret the
    /// customer needs to complete the deposit.
    ///
    /// # Sequence
    /// 1. Validate the request and look up the service and promo
    /// 2. Re-resolve availability; a requested slot that is no longer a
    ///    candidate fails with `SlotNoLongerAvailable`
    /// 3. Price the booking and freeze the quote
    /// 4. Atomically reserve the slot (`requested`)
    /// 5. Provision calendar event and payment intent through the gateway
    /// 6. Advance to `pending_payment`
    pub async fn create_booking(
        &self,
        request: CreateBookingRequest,
    ) -> Result<(Booking, Option<String>), ApiError> {
        request.validate()?;
        validate_distance_miles(request.distance_miles)
            .map_err(|e| ApiError::BadRequest(e.code.to_string()))?;

        let service = self
            .catalog
            .get_active(&request.service_id)
            .ok_or_else(|| BookingError::ServiceNotFound(request.service_id.clone()))?
            .clone();

        let requested_slot = Slot {
            start: request.slot_start,
            end: request.slot_end,
        };
        if requested_slot.end <= requested_slot.start {
            return Err(ApiError::BadRequest(
                "Slot end must be after slot start".to_string(),
            ));
        }
        if requested_slot.duration_minutes() != service.default_duration_minutes {
            return Err(ApiError::BadRequest(format!(
                "Slot must be exactly {} minutes for this service",
                service.default_duration_minutes
            )));
        }

        let now = Utc::now();
        let promo = match &request.promo_code {
            Some(code) => {
                let promo = self
                    .promo(code)
                    .ok_or_else(|| ApiError::BadRequest(format!("Unknown promo code: {}", code)))?;
                if !promo.is_valid_at(now) {
                    return Err(ApiError::BadRequest(format!(
                        "Promo code {} is not currently valid",
                        promo.code
                    )));
                }
                Some(promo.clone())
            }
            None => None,
        };

        // Revalidate against live availability; a stale or taken slot is a
        // conflict the customer resolves by picking another time.
        let buffer = Duration::minutes(
            self.resolver
                .rules()
                .buffer_between_appointments_minutes
                .max(0),
        );
        let existing = self
            .store
            .active_slots_in_range(
                &request.resource_id,
                requested_slot.start - buffer,
                requested_slot.end + buffer,
            )
            .await
            .map_err(ApiError::from)?;
        let bookable = self
            .resolver
            .is_bookable(&service, &requested_slot, &existing, now)
            .await?;
        if !bookable {
            return Err(ApiError::SlotNoLongerAvailable);
        }

        let quote = PricingEngine::price(&service, request.distance_miles, promo.as_ref(), now);

        let booking = Booking {
            id: Uuid::new_v4(),
            service_id: service.id.clone(),
            resource_id: request.resource_id.clone(),
            slot_start: requested_slot.start,
            slot_end: requested_slot.end,
            status: BookingStatus::Requested,
            deposit_status: DepositStatus::Unpaid,
            base_price_cents: quote.base_price_cents,
            travel_fee_cents: quote.travel_fee_cents,
            discount_cents: quote.discount_cents,
            deposit_cents: quote.deposit_cents,
            total_cents: quote.total_cents,
            promo_code: promo.as_ref().map(|p| p.code.clone()),
            distance_miles: request.distance_miles,
            customer_name: request.customer_name,
            customer_email: request.customer_email,
            customer_phone: request.customer_phone,
            customer_address: request.customer_address,
            external_payment_intent_id: None,
            external_calendar_event_id: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };

        let booking = self.store.insert_reserved(booking).await.map_err(ApiError::from)?;
        tracing::info!(booking_id = %booking.id, service_id = %booking.service_id, "slot reserved");

        let event_id = match self
            .gateway
            .call("calendar.create_event", QueuePolicy::Queue, || {
                self.calendar.create_event(
                    &self.calendar_id,
                    &booking.resource_id,
                    booking.slot_start,
                    booking.slot_end,
                    serde_json::json!({
                        "bookingId": booking.id,
                        "serviceId": booking.service_id,
                        "customerName": booking.customer_name,
                    }),
                )
            })
            .await
        {
            Ok(event_id) => event_id,
            Err(err) => {
                self.release_after_provider_failure(&booking, None, "calendar provisioning failed")
                    .await;
                return Err(map_provider_error(err, false));
            }
        };

        let intent = match self
            .gateway
            .call("payments.create_intent", QueuePolicy::Queue, || {
                self.payments.create_payment_intent(
                    booking.deposit_cents,
                    &self.currency,
                    serde_json::json!({ "bookingId": booking.id }),
                )
            })
            .await
        {
            Ok(intent) => intent,
            Err(err) => {
                self.release_after_provider_failure(
                    &booking,
                    Some(&event_id),
                    "payment intent creation failed",
                )
                .await;
                return Err(map_provider_error(err, true));
            }
        };

        let booking = self
            .store
            .set_external_refs(booking.id, Some(&intent.id), Some(&event_id))
            .await
            .map_err(ApiError::from)?;
        let booking = self
            .store
            .transition_status(
                booking.id,
                BookingStatus::Requested,
                BookingStatus::PendingPayment,
            )
            .await
            .map_err(ApiError::from)?;

        tracing::info!(booking_id = %booking.id, "booking awaiting payment");
        Ok((booking, Some(intent.client_secret)))
    }

    pub async fn get_booking(&self, id: Uuid) -> Result<Booking, ApiError> {
        self.store
            .find_by_id(id)
            .await
            .map_err(ApiError::from)?
            .ok_or(ApiError::NotFound {
                resource: "Booking".to_string(),
                id: id.to_string(),
            })
    }

    /// Cancel a booking on behalf of the client or the business
    ///
    /// The caller role picks the cancellation branch; a booking that is
    /// already terminal, or that the role may not cancel from its current
    /// status, is a conflict.
    pub async fn cancel_booking(
        &self,
        id: Uuid,
        request: CancelBookingRequest,
    ) -> Result<Booking, ApiError> {
        let booking = self.get_booking(id).await?;

        let target = if request.role.is_staff_side() {
            BookingStatus::CancelledByStaff
        } else {
            BookingStatus::CancelledByClient
        };

        StatusMachine::transition(booking.status, target)
            .map_err(|message| ApiError::Conflict { message })?;

        let reason = request.reason.as_deref();
        let cancelled = self
            .store
            .cancel(id, booking.status, target, reason)
            .await
            .map_err(ApiError::from)?;

        if let Some(event_id) = cancelled.external_calendar_event_id.clone() {
            // Best effort: a failed delete leaves a stale event, not a stale
            // booking
            let result = self
                .gateway
                .call("calendar.delete_event", QueuePolicy::Queue, || {
                    self.calendar.delete_event(&self.calendar_id, &event_id)
                })
                .await;
            if let Err(err) = result {
                tracing::error!(booking_id = %id, error = %err, "calendar event cleanup failed");
            }
        }

        self.notify(&cancelled, NotificationType::BookingCancelled, false);
        tracing::info!(booking_id = %id, status = %cancelled.status, "booking cancelled");
        Ok(cancelled)
    }

    /// Staff-driven lifecycle updates: start and complete the appointment
    pub async fn update_status(
        &self,
        id: Uuid,
        next: BookingStatus,
    ) -> Result<Booking, ApiError> {
        if !matches!(next, BookingStatus::InProgress | BookingStatus::Completed) {
            return Err(ApiError::BadRequest(
                "Only in_progress and completed may be set directly; use the cancel endpoint"
                    .to_string(),
            ));
        }

        let booking = self.get_booking(id).await?;
        StatusMachine::transition(booking.status, next)
            .map_err(|message| ApiError::Conflict { message })?;

        let updated = self
            .store
            .transition_status(id, booking.status, next)
            .await
            .map_err(ApiError::from)?;
        Ok(updated)
    }

    /// Mark the booking behind a payment intent as paid and confirmed
    ///
    /// Idempotent: confirming an already-confirmed booking returns it
    /// unchanged, so a provider redelivering a success event under a fresh
    /// event id is a no-op. Only a booking that moved somewhere else (a
    /// cancellation won the race) is a conflict.
    pub async fn confirm_payment(&self, payment_intent_id: &str) -> Result<Booking, ApiError> {
        let booking = self
            .store
            .find_by_payment_intent(payment_intent_id)
            .await
            .map_err(ApiError::from)?
            .ok_or_else(|| ApiError::NotFound {
                resource: "Booking".to_string(),
                id: payment_intent_id.to_string(),
            })?;

        let confirmed = match self
            .store
            .confirm_deposit_paid(booking.id, BookingStatus::PendingPayment)
            .await
        {
            Ok(confirmed) => confirmed,
            Err(BookingError::StaleTransition { expected, actual }) => {
                let current = self.get_booking(booking.id).await?;
                if current.status == BookingStatus::Confirmed {
                    tracing::info!(booking_id = %current.id, "confirmation replayed, booking already confirmed");
                    return Ok(current);
                }
                return Err(BookingError::StaleTransition { expected, actual }.into());
            }
            Err(err) => return Err(err.into()),
        };

        self.notify(&confirmed, NotificationType::BookingConfirmed, false);
        tracing::info!(booking_id = %confirmed.id, "booking confirmed");
        Ok(confirmed)
    }

    /// Mark the booking behind a payment intent as failed, releasing the slot
    ///
    /// Idempotent like `confirm_payment`: a replayed failure event finds the
    /// booking already in `failed_payment` and returns it without repeating
    /// the calendar cleanup or the notification.
    pub async fn fail_payment(
        &self,
        payment_intent_id: &str,
        reason: &str,
    ) -> Result<Booking, ApiError> {
        let booking = self
            .store
            .find_by_payment_intent(payment_intent_id)
            .await
            .map_err(ApiError::from)?
            .ok_or_else(|| ApiError::NotFound {
                resource: "Booking".to_string(),
                id: payment_intent_id.to_string(),
            })?;

        let failed = match self
            .store
            .transition_status(
                booking.id,
                BookingStatus::PendingPayment,
                BookingStatus::FailedPayment,
            )
            .await
        {
            Ok(failed) => failed,
            Err(BookingError::StaleTransition { expected, actual }) => {
                let current = self.get_booking(booking.id).await?;
                if current.status == BookingStatus::FailedPayment {
                    tracing::info!(booking_id = %current.id, "failure replayed, booking already failed");
                    return Ok(current);
                }
                return Err(BookingError::StaleTransition { expected, actual }.into());
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(event_id) = failed.external_calendar_event_id.clone() {
            let result = self
                .gateway
                .call("calendar.delete_event", QueuePolicy::Queue, || {
                    self.calendar.delete_event(&self.calendar_id, &event_id)
                })
                .await;
            if let Err(err) = result {
                tracing::error!(booking_id = %failed.id, error = %err, "calendar event cleanup failed");
            }
        }

        self.notify(&failed, NotificationType::PaymentFailed, false);
        tracing::warn!(booking_id = %failed.id, %reason, "payment failed, slot released");
        Ok(failed)
    }

    /// Candidate slots for a service over a window, for the availability API
    pub async fn resolve_availability(
        &self,
        service_id: &str,
        resource_id: &str,
        from: chrono::DateTime<Utc>,
        to: chrono::DateTime<Utc>,
    ) -> Result<Vec<Slot>, ApiError> {
        let service = self
            .catalog
            .get_active(service_id)
            .ok_or_else(|| BookingError::ServiceNotFound(service_id.to_string()))?
            .clone();

        let buffer = Duration::minutes(
            self.resolver
                .rules()
                .buffer_between_appointments_minutes
                .max(0),
        );
        let existing = self
            .store
            .active_slots_in_range(resource_id, from - buffer, to + buffer)
            .await
            .map_err(ApiError::from)?;

        self.resolver
            .resolve(&service, from, to, &existing, Utc::now())
            .await
    }

    async fn release_after_provider_failure(
        &self,
        booking: &Booking,
        calendar_event_id: Option<&str>,
        reason: &str,
    ) {
        if let Some(event_id) = calendar_event_id {
            let event_id = event_id.to_string();
            let result = self
                .gateway
                .call("calendar.delete_event", QueuePolicy::Queue, || {
                    self.calendar.delete_event(&self.calendar_id, &event_id)
                })
                .await;
            if let Err(err) = result {
                tracing::error!(booking_id = %booking.id, error = %err, "orphaned calendar event cleanup failed");
            }
        }

        match self
            .store
            .cancel(
                booking.id,
                BookingStatus::Requested,
                BookingStatus::CancelledByStaff,
                Some(reason),
            )
            .await
        {
            Ok(_) => {
                tracing::warn!(booking_id = %booking.id, %reason, "booking released after provider failure");
            }
            Err(err) => {
                tracing::error!(booking_id = %booking.id, error = %err, "failed to release booking");
            }
        }
    }

    fn notify(&self, booking: &Booking, notification_type: NotificationType, skip_dedup: bool) {
        let (subject, body) = match notification_type {
            NotificationType::BookingConfirmed => (
                "Your appointment is confirmed".to_string(),
                format!(
                    "Your {} appointment on {} is confirmed.",
                    booking.service_id,
                    booking.slot_start.to_rfc3339()
                ),
            ),
            NotificationType::BookingCancelled => (
                "Your appointment was cancelled".to_string(),
                format!(
                    "Your {} appointment on {} has been cancelled.",
                    booking.service_id,
                    booking.slot_start.to_rfc3339()
                ),
            ),
            NotificationType::PaymentFailed => (
                "Payment failed for your appointment".to_string(),
                format!(
                    "The deposit for your {} appointment on {} could not be collected. \
                     The time slot has been released.",
                    booking.service_id,
                    booking.slot_start.to_rfc3339()
                ),
            ),
        };

        self.notifier.enqueue(NotificationRequest {
            booking_id: booking.id,
            notification_type,
            recipient_email: Some(booking.customer_email.clone()),
            recipient_phone: booking.customer_phone.clone(),
            subject,
            body,
            skip_duplicate_check: skip_dedup,
        });
    }
}

/// Translate gateway failures into the API error taxonomy
///
/// On the payment endpoint a definitive provider refusal is a decline; on
/// other endpoints it is an upstream fault.
fn map_provider_error(err: GatewayError, payment_endpoint: bool) -> ApiError {
    match err {
        GatewayError::Provider(message) if payment_endpoint => ApiError::PaymentDeclined(message),
        GatewayError::Provider(message) => ApiError::ProviderError(message),
        other => ApiError::ProviderError(other.to_string()),
    }
}
