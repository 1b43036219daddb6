// Payment webhook reconciler
//
// Applies provider payment events to bookings exactly once. The event-id
// uniqueness check makes redelivery a no-op; the compare-and-swap transition
// in the booking store makes out-of-order events land as `superseded` rather
// than corrupting a booking that already moved on.

use std::sync::Arc;

use crate::bookings::BookingService;
use crate::error::ApiError;
use crate::gateway::RetryPolicy;
use crate::payments::{
    PaymentEventType, ProcessedWebhookEvent, ProcessingOutcome, ReconcilerMetrics,
    WebhookDisposition, WebhookEvent, WebhookEventStore,
};

pub struct PaymentReconciler {
    events: Arc<dyn WebhookEventStore>,
    bookings: Arc<BookingService>,
    metrics: ReconcilerMetrics,
    retry: RetryPolicy,
}

impl PaymentReconciler {
    pub fn new(
        events: Arc<dyn WebhookEventStore>,
        bookings: Arc<BookingService>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            events,
            bookings,
            metrics: ReconcilerMetrics::new(),
            retry,
        }
    }

    pub fn metrics(&self) -> &ReconcilerMetrics {
        &self.metrics
    }

    /// Process one webhook delivery
    ///
    /// Every disposition other than an internal storage fault is an
    /// acknowledgement: the provider must not redeliver events we have
    /// already seen or decided about.
    pub async fn handle_event(
        &self,
        event: WebhookEvent,
    ) -> Result<WebhookDisposition, ApiError> {
        let event_type = event.event_type;
        let _timer = self.metrics.start_timer(event_type);
        self.metrics.record_received(event_type);

        let record = ProcessedWebhookEvent {
            event_id: event.event_id.clone(),
            event_type: event.event_type,
            payment_intent_id: event.payment_intent_id.clone(),
            outcome: ProcessingOutcome::Received,
            detail: None,
            processed_at: chrono::Utc::now(),
        };
        let first_sight = self
            .events
            .insert_first_sight(record)
            .await
            .map_err(ApiError::InternalError)?;
        if !first_sight {
            self.metrics.record_duplicate(event_type);
            tracing::info!(event_id = %event.event_id, "duplicate webhook event acknowledged");
            return Ok(WebhookDisposition::Duplicate);
        }

        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            let result = match event.event_type {
                PaymentEventType::PaymentSucceeded => {
                    self.bookings
                        .confirm_payment(&event.payment_intent_id)
                        .await
                }
                PaymentEventType::PaymentFailed => {
                    let reason = event.reason.as_deref().unwrap_or("payment failed");
                    self.bookings
                        .fail_payment(&event.payment_intent_id, reason)
                        .await
                }
            };

            match result {
                Ok(booking) => {
                    self.record_outcome(&event.event_id, ProcessingOutcome::Applied, None)
                        .await;
                    self.metrics.record_applied(event_type);
                    tracing::info!(
                        event_id = %event.event_id,
                        booking_id = %booking.id,
                        event_type = %event.event_type,
                        "webhook event applied"
                    );
                    return Ok(WebhookDisposition::Applied);
                }
                Err(ApiError::Conflict { message }) => {
                    // The booking already moved past this event's transition
                    self.record_outcome(
                        &event.event_id,
                        ProcessingOutcome::Superseded,
                        Some(&message),
                    )
                    .await;
                    self.metrics.record_superseded(event_type);
                    tracing::warn!(
                        event_id = %event.event_id,
                        %message,
                        "webhook event superseded by booking state"
                    );
                    return Ok(WebhookDisposition::Superseded);
                }
                Err(ApiError::NotFound { .. }) => {
                    let detail = format!(
                        "no booking for payment intent {}",
                        event.payment_intent_id
                    );
                    self.record_outcome(
                        &event.event_id,
                        ProcessingOutcome::Failed,
                        Some(&detail),
                    )
                    .await;
                    self.metrics.record_dead_lettered(event_type);
                    tracing::error!(event_id = %event.event_id, %detail, "webhook event unmatched");
                    return Ok(WebhookDisposition::Failed);
                }
                Err(err) if is_transient(&err) => {
                    last_error = format!("{:?}", err);
                    if attempt + 1 < max_attempts {
                        self.metrics.record_retry(event_type);
                        tracing::warn!(
                            event_id = %event.event_id,
                            attempt,
                            error = %last_error,
                            "transient failure applying webhook event, retrying"
                        );
                        tokio::time::sleep(self.retry.backoff(attempt)).await;
                    }
                }
                Err(err) => {
                    let detail = format!("{:?}", err);
                    self.record_outcome(
                        &event.event_id,
                        ProcessingOutcome::Failed,
                        Some(&detail),
                    )
                    .await;
                    self.metrics.record_dead_lettered(event_type);
                    tracing::error!(event_id = %event.event_id, error = %detail, "webhook event failed");
                    return Ok(WebhookDisposition::Failed);
                }
            }
        }

        // Retry budget exhausted: dead-letter for manual replay
        let detail = format!("retries exhausted: {}", last_error);
        self.record_outcome(&event.event_id, ProcessingOutcome::Failed, Some(&detail))
            .await;
        self.metrics.record_dead_lettered(event_type);
        tracing::error!(event_id = %event.event_id, %detail, "webhook event dead-lettered");
        Ok(WebhookDisposition::Failed)
    }

    async fn record_outcome(
        &self,
        event_id: &str,
        outcome: ProcessingOutcome,
        detail: Option<&str>,
    ) {
        if let Err(err) = self.events.update_outcome(event_id, outcome, detail).await {
            tracing::error!(%event_id, %err, "failed to record webhook outcome");
        }
    }
}

fn is_transient(err: &ApiError) -> bool {
    matches!(
        err,
        ApiError::DatabaseError(_) | ApiError::InternalError(_) | ApiError::AvailabilityDegraded(_)
    )
}
