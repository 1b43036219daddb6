// End-to-end scenario tests for the booking engine
//
// All scenarios run on the in-memory stores with fixture providers, so they
// exercise the same service code the HTTP layer drives without a database.

use super::*;
use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::json;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::bookings::InMemoryBookingStore;
use crate::error::ApiError;
use crate::gateway::{ProviderCallError, RetryPolicy};
use crate::notifications::{
    Channel, InMemoryNotificationStore, NotificationProvider, NotificationStatus,
    NotificationStore, NotificationType, OutboundNotification,
};
use crate::payments::{
    compute_signature, InMemoryWebhookEventStore, ProcessingOutcome, WebhookEventStore,
    SIGNATURE_HEADER,
};
use crate::providers::{CalendarProvider, FreeWindow, PaymentIntent, PaymentProvider};

// ============================================================================
// Fixture Providers
// ============================================================================

/// Calendar that reports the whole queried window as free
struct FixtureCalendar {
    event_counter: AtomicU64,
    deleted: tokio::sync::Mutex<Vec<String>>,
}

impl FixtureCalendar {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            event_counter: AtomicU64::new(0),
            deleted: tokio::sync::Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CalendarProvider for FixtureCalendar {
    async fn free_slots(
        &self,
        _calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        _timezone: &str,
    ) -> Result<Vec<FreeWindow>, ProviderCallError> {
        Ok(vec![FreeWindow { start, end }])
    }

    async fn create_event(
        &self,
        _calendar_id: &str,
        _resource_id: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _metadata: serde_json::Value,
    ) -> Result<String, ProviderCallError> {
        let n = self.event_counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("cal_evt_{}", n))
    }

    async fn delete_event(
        &self,
        _calendar_id: &str,
        event_id: &str,
    ) -> Result<(), ProviderCallError> {
        self.deleted.lock().await.push(event_id.to_string());
        Ok(())
    }
}

/// Payment provider minting sequential intents, optionally declining
struct FixturePayments {
    intent_counter: AtomicU64,
    decline: AtomicBool,
}

impl FixturePayments {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            intent_counter: AtomicU64::new(0),
            decline: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl PaymentProvider for FixturePayments {
    async fn create_payment_intent(
        &self,
        _amount_cents: i64,
        _currency: &str,
        _metadata: serde_json::Value,
    ) -> Result<PaymentIntent, ProviderCallError> {
        if self.decline.load(Ordering::SeqCst) {
            return Err(ProviderCallError::Fatal("card declined".to_string()));
        }
        let n = self.intent_counter.fetch_add(1, Ordering::SeqCst);
        Ok(PaymentIntent {
            id: format!("pi_{}", n),
            client_secret: format!("pi_{}_secret", n),
        })
    }
}

/// Notification channel that always delivers
struct AlwaysOkChannel {
    channel: Channel,
}

#[async_trait]
impl NotificationProvider for AlwaysOkChannel {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, _n: &OutboundNotification) -> Result<(), ProviderCallError> {
        Ok(())
    }
}

// ============================================================================
// Test Harness
// ============================================================================

struct Harness {
    bookings: Arc<BookingService>,
    reconciler: Arc<PaymentReconciler>,
    events: Arc<InMemoryWebhookEventStore>,
    notifications: Arc<InMemoryNotificationStore>,
    calendar: Arc<FixtureCalendar>,
    payments: Arc<FixturePayments>,
}

fn fast_gateway() -> Arc<RateLimitedGateway> {
    Arc::new(RateLimitedGateway::new(GatewayConfig {
        bucket_capacity: 1000.0,
        refill_per_second: 1000.0,
        queue_limit: 64,
        attempt_timeout_ms: 1000,
        retry: RetryPolicy {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        },
    }))
}

fn harness() -> Harness {
    let gateway = fast_gateway();
    let calendar = FixtureCalendar::new();
    let payments = FixturePayments::new();
    let events = Arc::new(InMemoryWebhookEventStore::new());
    let notifications = Arc::new(InMemoryNotificationStore::new());

    let rules = BusinessCalendarRules::default();
    let store = Arc::new(InMemoryBookingStore::with_buffer(
        rules.buffer_between_appointments_minutes,
    ));
    let resolver = Arc::new(AvailabilityResolver::new(
        calendar.clone(),
        Arc::clone(&gateway),
        rules,
        "primary".to_string(),
    ));

    let (notifier, _dispatcher) = NotificationDispatcher::spawn(
        notifications.clone(),
        vec![Arc::new(AlwaysOkChannel {
            channel: Channel::Email,
        })],
        Arc::clone(&gateway),
        DispatcherConfig::default(),
    );

    let bookings = Arc::new(BookingService::new(
        store,
        resolver,
        models::default_catalog(),
        models::default_promos(),
        calendar.clone(),
        payments.clone(),
        Arc::clone(&gateway),
        notifier,
        "primary".to_string(),
    ));

    let reconciler = Arc::new(PaymentReconciler::new(
        events.clone(),
        Arc::clone(&bookings),
        RetryPolicy {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        },
    ));

    Harness {
        bookings,
        reconciler,
        events,
        notifications,
        calendar,
        payments,
    }
}

fn test_app(h: &Harness) -> TestServer {
    let state = AppState {
        bookings: Arc::clone(&h.bookings),
        reconciler: Arc::clone(&h.reconciler),
        webhook_secret: "whsec_test".to_string(),
    };
    TestServer::new(create_router(state)).unwrap()
}

/// A weekday slot far enough in the future to clear the lead-time rule.
/// 2030-06-03 is a Monday; 10:00-11:00 UTC sits inside the 9-17 business
/// window on the default granularity grid.
fn far_future_slot() -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc.with_ymd_and_hms(2030, 6, 3, 10, 0, 0).unwrap();
    (start, start + chrono::Duration::minutes(60))
}

fn booking_request(resource_id: &str) -> CreateBookingRequest {
    let (start, end) = far_future_slot();
    CreateBookingRequest {
        service_id: "STANDARD_NOTARY".to_string(),
        resource_id: resource_id.to_string(),
        slot_start: start,
        slot_end: end,
        customer_name: "Ada Example".to_string(),
        customer_email: "ada@example.com".to_string(),
        customer_phone: Some("+15550100".to_string()),
        customer_address: "1 Main St, Springfield".to_string(),
        distance_miles: 28.0,
        promo_code: None,
    }
}

fn webhook_event(event_id: &str, event_type: PaymentEventType, intent_id: &str) -> WebhookEvent {
    WebhookEvent {
        event_id: event_id.to_string(),
        event_type,
        payment_intent_id: intent_id.to_string(),
        amount_cents: Some(19_75),
        reason: match event_type {
            PaymentEventType::PaymentFailed => Some("insufficient funds".to_string()),
            PaymentEventType::PaymentSucceeded => None,
        },
        created_at: Some(Utc::now()),
    }
}

// ============================================================================
// Booking Creation
// ============================================================================

#[tokio::test]
async fn test_create_booking_reserves_and_prices() {
    let h = harness();
    let (booking, client_secret) = h.bookings.create_booking(booking_request("notary_1")).await.unwrap();

    assert_eq!(booking.status, BookingStatus::PendingPayment);
    assert_eq!(booking.deposit_status, DepositStatus::Unpaid);
    assert!(client_secret.is_some());
    assert!(booking.external_payment_intent_id.is_some());
    assert!(booking.external_calendar_event_id.is_some());

    // 28 miles against a 20-mile included radius at 50c/mile
    assert_eq!(booking.base_price_cents, 75_00);
    assert_eq!(booking.travel_fee_cents, 4_00);
    assert_eq!(booking.discount_cents, 0);
    assert_eq!(booking.total_cents, 79_00);
    // 25% deposit, rounded half-up
    assert_eq!(booking.deposit_cents, 19_75);
}

#[tokio::test]
async fn test_create_booking_rejects_unknown_service() {
    let h = harness();
    let mut request = booking_request("notary_1");
    request.service_id = "NO_SUCH_SERVICE".to_string();

    let result = h.bookings.create_booking(request).await;
    assert!(matches!(result, Err(ApiError::NotFound { .. })));
}

#[tokio::test]
async fn test_create_booking_rejects_wrong_duration() {
    let h = harness();
    let mut request = booking_request("notary_1");
    request.slot_end = request.slot_start + chrono::Duration::minutes(45);

    let result = h.bookings.create_booking(request).await;
    assert!(matches!(result, Err(ApiError::BadRequest(_))));
}

#[tokio::test]
async fn test_create_booking_inside_lead_time_is_rejected() {
    let h = harness();
    let mut request = booking_request("notary_1");
    // A slot starting right now can never clear the lead-time rule
    request.slot_start = Utc::now();
    request.slot_end = request.slot_start + chrono::Duration::minutes(60);

    let result = h.bookings.create_booking(request).await;
    assert!(matches!(result, Err(ApiError::SlotNoLongerAvailable)));
}

#[tokio::test]
async fn test_concurrent_bookings_one_winner() {
    let h = harness();

    let first = h.bookings.create_booking(booking_request("notary_1"));
    let second = h.bookings.create_booking(booking_request("notary_1"));
    let (first, second) = tokio::join!(first, second);

    let winners = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one of two racing requests must win");
    let loser = if first.is_ok() { second } else { first };
    assert!(matches!(loser, Err(ApiError::SlotNoLongerAvailable)));
}

#[tokio::test]
async fn test_concurrent_back_to_back_bookings_one_winner() {
    let h = harness();

    // 11:00 starts inside the 30-minute buffer after the 10:00-11:00 slot,
    // so the reservation guard itself must reject the second request even
    // when both pass revalidation before either insert lands
    let mut adjacent = booking_request("notary_1");
    adjacent.slot_start += chrono::Duration::minutes(60);
    adjacent.slot_end += chrono::Duration::minutes(60);

    let first = h.bookings.create_booking(booking_request("notary_1"));
    let second = h.bookings.create_booking(adjacent);
    let (first, second) = tokio::join!(first, second);

    let winners = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "buffer-adjacent slots must not both commit");
    let loser = if first.is_ok() { second } else { first };
    assert!(matches!(loser, Err(ApiError::SlotNoLongerAvailable)));
}

#[tokio::test]
async fn test_same_slot_different_resources_both_book() {
    let h = harness();

    h.bookings.create_booking(booking_request("notary_1")).await.unwrap();
    h.bookings.create_booking(booking_request("notary_2")).await.unwrap();
}

#[tokio::test]
async fn test_payment_decline_releases_slot() {
    let h = harness();
    h.payments.decline.store(true, Ordering::SeqCst);

    let result = h.bookings.create_booking(booking_request("notary_1")).await;
    assert!(matches!(result, Err(ApiError::PaymentDeclined(_))));

    // The orphaned calendar event was compensated away
    assert_eq!(h.calendar.deleted.lock().await.len(), 1);

    // The slot is free again for the next customer
    h.payments.decline.store(false, Ordering::SeqCst);
    let retry = h.bookings.create_booking(booking_request("notary_1")).await;
    assert!(retry.is_ok());
}

#[tokio::test]
async fn test_promo_code_is_applied_to_snapshot() {
    let h = harness();
    let mut request = booking_request("notary_1");
    request.promo_code = Some("welcome10".to_string());

    let (booking, _) = h.bookings.create_booking(request).await.unwrap();
    // 10% of 79.00, under the 20.00 cap
    assert_eq!(booking.discount_cents, 7_90);
    assert_eq!(booking.total_cents, 71_10);
    assert_eq!(booking.promo_code.as_deref(), Some("WELCOME10"));
}

// ============================================================================
// Webhook Reconciliation
// ============================================================================

#[tokio::test]
async fn test_webhook_confirms_booking_exactly_once() {
    let h = harness();
    let (booking, _) = h.bookings.create_booking(booking_request("notary_1")).await.unwrap();
    let intent_id = booking.external_payment_intent_id.clone().unwrap();

    let event = webhook_event("evt_1", PaymentEventType::PaymentSucceeded, &intent_id);
    let first = h.reconciler.handle_event(event.clone()).await.unwrap();
    assert_eq!(first, WebhookDisposition::Applied);

    let confirmed = h.bookings.get_booking(booking.id).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(confirmed.deposit_status, DepositStatus::Paid);

    // Redelivery of the same event id is acknowledged without reapplying
    let second = h.reconciler.handle_event(event).await.unwrap();
    assert_eq!(second, WebhookDisposition::Duplicate);

    let stored = h.events.get("evt_1").await.unwrap().unwrap();
    assert_eq!(stored.outcome, ProcessingOutcome::Applied);

    let summary = h.reconciler.metrics().summary();
    assert_eq!(summary.events_received, 2);
    assert_eq!(summary.events_applied, 1);
    assert_eq!(summary.events_duplicate, 1);
}

#[tokio::test]
async fn test_success_redelivered_under_new_event_id_is_noop() {
    let h = harness();
    let (booking, _) = h.bookings.create_booking(booking_request("notary_1")).await.unwrap();
    let intent_id = booking.external_payment_intent_id.clone().unwrap();

    let first = webhook_event("evt_a", PaymentEventType::PaymentSucceeded, &intent_id);
    assert_eq!(
        h.reconciler.handle_event(first).await.unwrap(),
        WebhookDisposition::Applied
    );

    // Some providers redeliver the same payment outcome under a fresh event
    // id, which the event-id dedup cannot catch
    let redelivered = webhook_event("evt_b", PaymentEventType::PaymentSucceeded, &intent_id);
    assert_eq!(
        h.reconciler.handle_event(redelivered).await.unwrap(),
        WebhookDisposition::Applied
    );

    let current = h.bookings.get_booking(booking.id).await.unwrap();
    assert_eq!(current.status, BookingStatus::Confirmed);
    assert_eq!(current.deposit_status, DepositStatus::Paid);

    // Direct replay on the service is the same no-op
    let replayed = h.bookings.confirm_payment(&intent_id).await.unwrap();
    assert_eq!(replayed.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn test_failure_redelivered_under_new_event_id_is_noop() {
    let h = harness();
    let (booking, _) = h.bookings.create_booking(booking_request("notary_1")).await.unwrap();
    let intent_id = booking.external_payment_intent_id.clone().unwrap();

    let first = webhook_event("evt_a", PaymentEventType::PaymentFailed, &intent_id);
    assert_eq!(
        h.reconciler.handle_event(first).await.unwrap(),
        WebhookDisposition::Applied
    );
    assert_eq!(h.calendar.deleted.lock().await.len(), 1);

    let redelivered = webhook_event("evt_b", PaymentEventType::PaymentFailed, &intent_id);
    assert_eq!(
        h.reconciler.handle_event(redelivered).await.unwrap(),
        WebhookDisposition::Applied
    );

    let current = h.bookings.get_booking(booking.id).await.unwrap();
    assert_eq!(current.status, BookingStatus::FailedPayment);
    // The calendar cleanup is not repeated on replay
    assert_eq!(h.calendar.deleted.lock().await.len(), 1);
}

#[tokio::test]
async fn test_out_of_order_failure_is_superseded() {
    let h = harness();
    let (booking, _) = h.bookings.create_booking(booking_request("notary_1")).await.unwrap();
    let intent_id = booking.external_payment_intent_id.clone().unwrap();

    let succeeded = webhook_event("evt_ok", PaymentEventType::PaymentSucceeded, &intent_id);
    assert_eq!(
        h.reconciler.handle_event(succeeded).await.unwrap(),
        WebhookDisposition::Applied
    );

    // A late failure event for the same intent must not un-confirm
    let failed = webhook_event("evt_late", PaymentEventType::PaymentFailed, &intent_id);
    assert_eq!(
        h.reconciler.handle_event(failed).await.unwrap(),
        WebhookDisposition::Superseded
    );

    let current = h.bookings.get_booking(booking.id).await.unwrap();
    assert_eq!(current.status, BookingStatus::Confirmed);

    let stored = h.events.get("evt_late").await.unwrap().unwrap();
    assert_eq!(stored.outcome, ProcessingOutcome::Superseded);
}

#[tokio::test]
async fn test_payment_failure_releases_slot() {
    let h = harness();
    let (booking, _) = h.bookings.create_booking(booking_request("notary_1")).await.unwrap();
    let intent_id = booking.external_payment_intent_id.clone().unwrap();

    let failed = webhook_event("evt_fail", PaymentEventType::PaymentFailed, &intent_id);
    assert_eq!(
        h.reconciler.handle_event(failed).await.unwrap(),
        WebhookDisposition::Applied
    );

    let current = h.bookings.get_booking(booking.id).await.unwrap();
    assert_eq!(current.status, BookingStatus::FailedPayment);

    // Another customer can take the released slot
    let rebooked = h.bookings.create_booking(booking_request("notary_1")).await;
    assert!(rebooked.is_ok());
}

#[tokio::test]
async fn test_unmatched_intent_is_dead_lettered() {
    let h = harness();

    let event = webhook_event("evt_orphan", PaymentEventType::PaymentSucceeded, "pi_unknown");
    assert_eq!(
        h.reconciler.handle_event(event).await.unwrap(),
        WebhookDisposition::Failed
    );

    let stored = h.events.get("evt_orphan").await.unwrap().unwrap();
    assert_eq!(stored.outcome, ProcessingOutcome::Failed);
    assert_eq!(h.reconciler.metrics().summary().events_dead_lettered, 1);
}

#[tokio::test]
async fn test_price_snapshot_survives_confirmation() {
    let h = harness();
    let (booking, _) = h.bookings.create_booking(booking_request("notary_1")).await.unwrap();
    let intent_id = booking.external_payment_intent_id.clone().unwrap();
    let quote_at_creation = booking.quote();

    let event = webhook_event("evt_1", PaymentEventType::PaymentSucceeded, &intent_id);
    h.reconciler.handle_event(event).await.unwrap();

    let confirmed = h.bookings.get_booking(booking.id).await.unwrap();
    assert_eq!(confirmed.quote(), quote_at_creation);
}

// ============================================================================
// Cancellation and Lifecycle
// ============================================================================

#[tokio::test]
async fn test_client_cancel_releases_slot() {
    let h = harness();
    let (booking, _) = h.bookings.create_booking(booking_request("notary_1")).await.unwrap();

    let cancelled = h
        .bookings
        .cancel_booking(
            booking.id,
            CancelBookingRequest {
                role: Role::User,
                reason: Some("changed plans".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::CancelledByClient);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("changed plans"));

    let rebooked = h.bookings.create_booking(booking_request("notary_1")).await;
    assert!(rebooked.is_ok());
}

#[tokio::test]
async fn test_staff_cancel_uses_staff_branch() {
    let h = harness();
    let (booking, _) = h.bookings.create_booking(booking_request("notary_1")).await.unwrap();

    let cancelled = h
        .bookings
        .cancel_booking(
            booking.id,
            CancelBookingRequest {
                role: Role::Staff,
                reason: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::CancelledByStaff);
}

#[tokio::test]
async fn test_completed_booking_cannot_be_cancelled() {
    let h = harness();
    let (booking, _) = h.bookings.create_booking(booking_request("notary_1")).await.unwrap();
    let intent_id = booking.external_payment_intent_id.clone().unwrap();

    let event = webhook_event("evt_1", PaymentEventType::PaymentSucceeded, &intent_id);
    h.reconciler.handle_event(event).await.unwrap();
    h.bookings
        .update_status(booking.id, BookingStatus::InProgress)
        .await
        .unwrap();
    h.bookings
        .update_status(booking.id, BookingStatus::Completed)
        .await
        .unwrap();

    let result = h
        .bookings
        .cancel_booking(
            booking.id,
            CancelBookingRequest {
                role: Role::User,
                reason: None,
            },
        )
        .await;
    assert!(matches!(result, Err(ApiError::Conflict { .. })));
}

#[tokio::test]
async fn test_status_update_only_accepts_progress_states() {
    let h = harness();
    let (booking, _) = h.bookings.create_booking(booking_request("notary_1")).await.unwrap();

    let result = h
        .bookings
        .update_status(booking.id, BookingStatus::Confirmed)
        .await;
    assert!(matches!(result, Err(ApiError::BadRequest(_))));
}

#[tokio::test]
async fn test_confirmation_sends_notification() {
    let h = harness();
    let (booking, _) = h.bookings.create_booking(booking_request("notary_1")).await.unwrap();
    let intent_id = booking.external_payment_intent_id.clone().unwrap();

    let event = webhook_event("evt_1", PaymentEventType::PaymentSucceeded, &intent_id);
    h.reconciler.handle_event(event).await.unwrap();

    // Delivery is asynchronous; poll until the worker drains the queue
    let mut sent = Vec::new();
    for _ in 0..100 {
        let records = h.notifications.list_for_booking(booking.id).await.unwrap();
        sent = records
            .into_iter()
            .filter(|n| n.status == NotificationStatus::Sent)
            .collect();
        if !sent.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].notification_type, NotificationType::BookingConfirmed);
    assert_eq!(sent[0].channel, Channel::Email);
    assert_eq!(sent[0].recipient, "ada@example.com");
}

// ============================================================================
// HTTP Surface
// ============================================================================

#[tokio::test]
async fn test_availability_endpoint_lists_slots() {
    let h = harness();
    let server = test_app(&h);

    let response = server
        .get("/api/availability")
        .add_query_param("service_id", "STANDARD_NOTARY")
        .add_query_param("resource_id", "notary_1")
        .add_query_param("from", "2030-06-03T00:00:00Z")
        .add_query_param("to", "2030-06-04T00:00:00Z")
        .await;
    response.assert_status(StatusCode::OK);

    let body: serde_json::Value = response.json();
    let slots = body["slots"].as_array().unwrap();
    assert!(!slots.is_empty());
    // 9-17 business hours, 60-minute slots on a 30-minute grid
    assert_eq!(slots[0]["start"].as_str().unwrap(), "2030-06-03T09:00:00Z");
}

#[tokio::test]
async fn test_booking_endpoints_round_trip() {
    let h = harness();
    let server = test_app(&h);
    let (start, end) = far_future_slot();

    let response = server
        .post("/api/bookings")
        .json(&json!({
            "service_id": "STANDARD_NOTARY",
            "resource_id": "notary_1",
            "slot_start": start.to_rfc3339(),
            "slot_end": end.to_rfc3339(),
            "customer_name": "Ada Example",
            "customer_email": "ada@example.com",
            "customer_address": "1 Main St, Springfield",
            "distance_miles": 28.0
        }))
        .await;
    response.assert_status(StatusCode::CREATED);

    let created: serde_json::Value = response.json();
    assert_eq!(created["status"].as_str().unwrap(), "pending_payment");
    assert!(created["payment_client_secret"].is_string());
    assert_eq!(created["price"]["total_cents"].as_i64().unwrap(), 79_00);

    let id = created["id"].as_str().unwrap();
    let fetched = server.get(&format!("/api/bookings/{}", id)).await;
    fetched.assert_status(StatusCode::OK);
    let fetched: serde_json::Value = fetched.json();
    assert_eq!(fetched["id"].as_str().unwrap(), id);
    // The client secret is only ever disclosed on creation
    assert!(fetched["payment_client_secret"].is_null());
}

#[tokio::test]
async fn test_quote_endpoint_prices_without_booking() {
    let h = harness();
    let server = test_app(&h);

    let response = server
        .post("/api/pricing/quote")
        .json(&json!({
            "service_id": "STANDARD_NOTARY",
            "distance_miles": 28.0,
            "promo_code": "WELCOME10"
        }))
        .await;
    response.assert_status(StatusCode::OK);

    let quote: serde_json::Value = response.json();
    assert_eq!(quote["base_price_cents"].as_i64().unwrap(), 75_00);
    assert_eq!(quote["travel_fee_cents"].as_i64().unwrap(), 4_00);
    assert_eq!(quote["discount_cents"].as_i64().unwrap(), 7_90);
    assert_eq!(quote["total_cents"].as_i64().unwrap(), 71_10);
}

#[tokio::test]
async fn test_webhook_endpoint_accepts_signed_event() {
    let h = harness();
    let (booking, _) = h.bookings.create_booking(booking_request("notary_1")).await.unwrap();
    let intent_id = booking.external_payment_intent_id.clone().unwrap();
    let server = test_app(&h);

    let body = serde_json::to_string(&webhook_event(
        "evt_http",
        PaymentEventType::PaymentSucceeded,
        &intent_id,
    ))
    .unwrap();
    let signature = compute_signature("whsec_test", &body);

    let response = server
        .post("/webhooks/payment")
        .add_header(
            axum::http::HeaderName::from_static(SIGNATURE_HEADER),
            axum::http::HeaderValue::from_str(&signature).unwrap(),
        )
        .text(body)
        .await;
    response.assert_status(StatusCode::OK);

    let ack: serde_json::Value = response.json();
    assert_eq!(ack["disposition"].as_str().unwrap(), "applied");

    let confirmed = h.bookings.get_booking(booking.id).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn test_webhook_endpoint_rejects_bad_signature() {
    let h = harness();
    let server = test_app(&h);

    let body = serde_json::to_string(&webhook_event(
        "evt_forged",
        PaymentEventType::PaymentSucceeded,
        "pi_0",
    ))
    .unwrap();

    let response = server
        .post("/webhooks/payment")
        .add_header(
            axum::http::HeaderName::from_static(SIGNATURE_HEADER),
            axum::http::HeaderValue::from_static("deadbeef"),
        )
        .text(body.clone())
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let missing = server.post("/webhooks/payment").text(body).await;
    missing.assert_status(StatusCode::BAD_REQUEST);

    // Nothing was recorded for the forged delivery
    assert!(h.events.get("evt_forged").await.unwrap().is_none());
}

#[tokio::test]
async fn test_metrics_endpoint_reports_counters() {
    let h = harness();
    let (booking, _) = h.bookings.create_booking(booking_request("notary_1")).await.unwrap();
    let intent_id = booking.external_payment_intent_id.clone().unwrap();

    let event = webhook_event("evt_1", PaymentEventType::PaymentSucceeded, &intent_id);
    h.reconciler.handle_event(event.clone()).await.unwrap();
    h.reconciler.handle_event(event).await.unwrap();

    let server = test_app(&h);
    let response = server.get("/api/metrics/reconciler").await;
    response.assert_status(StatusCode::OK);

    let summary: serde_json::Value = response.json();
    assert_eq!(summary["events_received"].as_u64().unwrap(), 2);
    assert_eq!(summary["events_applied"].as_u64().unwrap(), 1);
    assert_eq!(summary["events_duplicate"].as_u64().unwrap(), 1);

    // Counters are also broken out per event type
    let per_type = summary["per_event_type"].as_array().unwrap();
    let succeeded = per_type
        .iter()
        .find(|t| t["event_type"] == "payment_succeeded")
        .unwrap();
    assert_eq!(succeeded["total_processed"].as_u64().unwrap(), 2);
    assert_eq!(succeeded["success_rate"].as_f64().unwrap(), 0.5);
    let failed = per_type
        .iter()
        .find(|t| t["event_type"] == "payment_failed")
        .unwrap();
    assert_eq!(failed["total_processed"].as_u64().unwrap(), 0);
}

#[tokio::test]
async fn test_cancel_endpoint_round_trip() {
    let h = harness();
    let (booking, _) = h.bookings.create_booking(booking_request("notary_1")).await.unwrap();
    let server = test_app(&h);

    let response = server
        .post(&format!("/api/bookings/{}/cancel", booking.id))
        .json(&json!({ "role": "user", "reason": "changed plans" }))
        .await;
    response.assert_status(StatusCode::OK);

    let body: serde_json::Value = response.json();
    assert_eq!(body["status"].as_str().unwrap(), "cancelled_by_client");

    // Cancelling again conflicts: the booking is already terminal
    let again = server
        .post(&format!("/api/bookings/{}/cancel", booking.id))
        .json(&json!({ "role": "user" }))
        .await;
    again.assert_status(StatusCode::CONFLICT);
}
