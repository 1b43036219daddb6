// Notification dispatcher
//
// A bounded queue feeds a small worker pool. Enqueueing never blocks the
// caller: booking and reconciliation flows hand off and move on. Each
// notification walks the configured channels in order and fails over to the
// next channel when one is exhausted; a notification that exhausts every
// channel lands in the dead-letter queue for manual follow-up.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::gateway::{GatewayError, QueuePolicy, RateLimitedGateway};
use crate::notifications::providers::NotificationProvider;
use crate::notifications::store::NotificationStore;
use crate::notifications::{
    Channel, DeadLetterEntry, NotificationRequest, NotificationStatus, OutboundNotification,
};

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub queue_capacity: usize,
    pub worker_count: usize,
    /// A (booking, type, channel) key sent within this window suppresses
    /// re-sends unless the request opts out.
    pub dedup_window_minutes: i64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            worker_count: 2,
            dedup_window_minutes: 10,
        }
    }
}

/// Cheap, clonable handle for enqueueing notifications
#[derive(Clone)]
pub struct NotificationSender {
    tx: mpsc::Sender<NotificationRequest>,
}

impl NotificationSender {
    /// Hand a notification to the dispatcher without waiting
    ///
    /// Returns `false` when the queue is full; the caller's transaction is
    /// never held up by delivery.
    pub fn enqueue(&self, request: NotificationRequest) -> bool {
        match self.tx.try_send(request) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(request)) => {
                tracing::error!(
                    booking_id = %request.booking_id,
                    notification_type = %request.notification_type,
                    "notification queue full, dropping request"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(request)) => {
                tracing::error!(
                    booking_id = %request.booking_id,
                    "notification dispatcher is shut down"
                );
                false
            }
        }
    }
}

/// Worker pool draining the notification queue
pub struct NotificationDispatcher {
    workers: Vec<JoinHandle<()>>,
}

impl NotificationDispatcher {
    /// Start the worker pool and return the enqueue handle alongside it
    pub fn spawn(
        store: Arc<dyn NotificationStore>,
        providers: Vec<Arc<dyn NotificationProvider>>,
        gateway: Arc<RateLimitedGateway>,
        config: DispatcherConfig,
    ) -> (NotificationSender, Self) {
        let (tx, rx) = mpsc::channel::<NotificationRequest>(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let rx = Arc::clone(&rx);
            let store = Arc::clone(&store);
            let providers = providers.clone();
            let gateway = Arc::clone(&gateway);
            let dedup_window = config.dedup_window_minutes;

            workers.push(tokio::spawn(async move {
                loop {
                    let request = { rx.lock().await.recv().await };
                    match request {
                        Some(request) => {
                            process_request(&store, &providers, &gateway, dedup_window, request)
                                .await;
                        }
                        None => {
                            tracing::debug!(worker_id, "notification worker draining complete");
                            break;
                        }
                    }
                }
            }));
        }

        (NotificationSender { tx }, Self { workers })
    }

    /// Wait for the workers to drain the queue and exit
    ///
    /// All `NotificationSender` clones must be dropped first or this waits
    /// forever.
    pub async fn shutdown(self) {
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

fn recipient_for(channel: Channel, request: &NotificationRequest) -> Option<String> {
    match channel {
        Channel::Email => request.recipient_email.clone(),
        Channel::Sms => request.recipient_phone.clone(),
        // The auto-responder logs; any contact point will do for the record
        Channel::Assistant => request
            .recipient_email
            .clone()
            .or_else(|| request.recipient_phone.clone())
            .or_else(|| Some("staff-log".to_string())),
    }
}

async fn process_request(
    store: &Arc<dyn NotificationStore>,
    providers: &[Arc<dyn NotificationProvider>],
    gateway: &Arc<RateLimitedGateway>,
    dedup_window_minutes: i64,
    request: NotificationRequest,
) {
    let mut last_error = String::from("no delivery channel had a usable recipient");

    for provider in providers {
        let channel = provider.channel();
        let Some(recipient) = recipient_for(channel, &request) else {
            continue;
        };

        if !request.skip_duplicate_check {
            let since = Utc::now() - Duration::minutes(dedup_window_minutes);
            match store
                .sent_since(request.booking_id, request.notification_type, channel, since)
                .await
            {
                Ok(true) => {
                    tracing::debug!(
                        booking_id = %request.booking_id,
                        notification_type = %request.notification_type,
                        %channel,
                        "duplicate notification suppressed"
                    );
                    return;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(%err, "dedup lookup failed, sending anyway");
                }
            }
        }

        let notification = OutboundNotification {
            id: Uuid::new_v4(),
            booking_id: request.booking_id,
            notification_type: request.notification_type,
            channel,
            recipient,
            subject: request.subject.clone(),
            body: request.body.clone(),
            status: NotificationStatus::Pending,
            attempt_count: 0,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        if let Err(err) = store.insert(notification.clone()).await {
            tracing::error!(%err, "failed to persist notification record");
        }

        let endpoint = format!("notify.{}", channel);
        let result = gateway
            .call(&endpoint, QueuePolicy::Queue, || provider.send(&notification))
            .await;

        match result {
            Ok(()) => {
                if let Err(err) = store.mark_sent(notification.id).await {
                    tracing::error!(%err, "failed to mark notification sent");
                }
                tracing::info!(
                    booking_id = %request.booking_id,
                    notification_type = %request.notification_type,
                    %channel,
                    "notification delivered"
                );
                return;
            }
            Err(err) => {
                let attempts = match &err {
                    GatewayError::Exhausted { attempts, .. } => *attempts as i32,
                    _ => 1,
                };
                last_error = err.to_string();
                if let Err(store_err) = store
                    .mark_failed(notification.id, attempts, &last_error)
                    .await
                {
                    tracing::error!(%store_err, "failed to mark notification failed");
                }
                tracing::warn!(
                    booking_id = %request.booking_id,
                    %channel,
                    error = %last_error,
                    "channel failed, trying next"
                );
            }
        }
    }

    // Every channel exhausted
    tracing::error!(
        booking_id = %request.booking_id,
        notification_type = %request.notification_type,
        "notification undeliverable on all channels"
    );
    let entry = DeadLetterEntry {
        id: Uuid::new_v4(),
        booking_id: request.booking_id,
        notification_type: request.notification_type,
        reason: last_error,
        created_at: Utc::now(),
    };
    if let Err(err) = store.push_dead_letter(entry).await {
        tracing::error!(%err, "failed to record dead letter");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayConfig, ProviderCallError, RetryPolicy};
    use crate::notifications::store::InMemoryNotificationStore;
    use crate::notifications::NotificationType;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FixtureProvider {
        channel: Channel,
        fail: AtomicBool,
    }

    impl FixtureProvider {
        fn ok(channel: Channel) -> Arc<Self> {
            Arc::new(Self {
                channel,
                fail: AtomicBool::new(false),
            })
        }

        fn failing(channel: Channel) -> Arc<Self> {
            Arc::new(Self {
                channel,
                fail: AtomicBool::new(true),
            })
        }
    }

    #[async_trait]
    impl NotificationProvider for FixtureProvider {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn send(&self, _n: &OutboundNotification) -> Result<(), ProviderCallError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(ProviderCallError::Retryable("relay down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn fast_gateway() -> Arc<RateLimitedGateway> {
        Arc::new(RateLimitedGateway::new(GatewayConfig {
            bucket_capacity: 100.0,
            refill_per_second: 100.0,
            queue_limit: 16,
            attempt_timeout_ms: 100,
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
                backoff_multiplier: 2.0,
                jitter_factor: 0.0,
            },
        }))
    }

    fn request(booking_id: Uuid, skip_duplicate_check: bool) -> NotificationRequest {
        NotificationRequest {
            booking_id,
            notification_type: NotificationType::BookingConfirmed,
            recipient_email: Some("ada@example.com".to_string()),
            recipient_phone: Some("+15550100".to_string()),
            subject: "Your booking is confirmed".to_string(),
            body: "See you soon.".to_string(),
            skip_duplicate_check,
        }
    }

    async fn drain(sender: NotificationSender, dispatcher: NotificationDispatcher) {
        drop(sender);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_delivers_on_first_channel() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let (sender, dispatcher) = NotificationDispatcher::spawn(
            store.clone(),
            vec![FixtureProvider::ok(Channel::Email)],
            fast_gateway(),
            DispatcherConfig::default(),
        );

        let booking_id = Uuid::new_v4();
        assert!(sender.enqueue(request(booking_id, false)));
        drain(sender, dispatcher).await;

        let sent = store.list_for_booking(booking_id).await.unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, Channel::Email);
        assert_eq!(sent[0].status, NotificationStatus::Sent);
        assert!(store.dead_letters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fails_over_to_next_channel() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let (sender, dispatcher) = NotificationDispatcher::spawn(
            store.clone(),
            vec![
                FixtureProvider::failing(Channel::Email),
                FixtureProvider::ok(Channel::Sms),
            ],
            fast_gateway(),
            DispatcherConfig::default(),
        );

        let booking_id = Uuid::new_v4();
        sender.enqueue(request(booking_id, false));
        drain(sender, dispatcher).await;

        let records = store.list_for_booking(booking_id).await.unwrap();
        assert_eq!(records.len(), 2);
        let email = records.iter().find(|n| n.channel == Channel::Email).unwrap();
        let sms = records.iter().find(|n| n.channel == Channel::Sms).unwrap();
        assert_eq!(email.status, NotificationStatus::Failed);
        assert!(email.last_error.is_some());
        assert_eq!(sms.status, NotificationStatus::Sent);
    }

    #[tokio::test]
    async fn test_exhausting_all_channels_dead_letters() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let (sender, dispatcher) = NotificationDispatcher::spawn(
            store.clone(),
            vec![
                FixtureProvider::failing(Channel::Email),
                FixtureProvider::failing(Channel::Sms),
            ],
            fast_gateway(),
            DispatcherConfig::default(),
        );

        let booking_id = Uuid::new_v4();
        sender.enqueue(request(booking_id, false));
        drain(sender, dispatcher).await;

        let dead = store.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].booking_id, booking_id);
        let records = store.list_for_booking(booking_id).await.unwrap();
        assert!(records
            .iter()
            .all(|n| n.status == NotificationStatus::Failed));
    }

    #[tokio::test]
    async fn test_static_responder_catches_total_relay_outage() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let (sender, dispatcher) = NotificationDispatcher::spawn(
            store.clone(),
            vec![
                FixtureProvider::failing(Channel::Email),
                FixtureProvider::failing(Channel::Sms),
                Arc::new(crate::notifications::StaticAutoResponder::new()),
            ],
            fast_gateway(),
            DispatcherConfig::default(),
        );

        let booking_id = Uuid::new_v4();
        sender.enqueue(request(booking_id, false));
        drain(sender, dispatcher).await;

        let records = store.list_for_booking(booking_id).await.unwrap();
        let assistant = records
            .iter()
            .find(|n| n.channel == Channel::Assistant)
            .unwrap();
        assert_eq!(assistant.status, NotificationStatus::Sent);
        assert!(store.dead_letters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_within_window_is_suppressed() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let provider = FixtureProvider::ok(Channel::Email);
        let (sender, dispatcher) = NotificationDispatcher::spawn(
            store.clone(),
            vec![provider],
            fast_gateway(),
            DispatcherConfig {
                worker_count: 1,
                ..DispatcherConfig::default()
            },
        );

        let booking_id = Uuid::new_v4();
        sender.enqueue(request(booking_id, false));
        sender.enqueue(request(booking_id, false));
        drain(sender, dispatcher).await;

        let records = store.list_for_booking(booking_id).await.unwrap();
        let sent: Vec<_> = records
            .iter()
            .filter(|n| n.status == NotificationStatus::Sent)
            .collect();
        assert_eq!(sent.len(), 1);
    }

    #[tokio::test]
    async fn test_skip_duplicate_check_forces_resend() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let (sender, dispatcher) = NotificationDispatcher::spawn(
            store.clone(),
            vec![FixtureProvider::ok(Channel::Email)],
            fast_gateway(),
            DispatcherConfig {
                worker_count: 1,
                ..DispatcherConfig::default()
            },
        );

        let booking_id = Uuid::new_v4();
        sender.enqueue(request(booking_id, false));
        sender.enqueue(request(booking_id, true));
        drain(sender, dispatcher).await;

        let records = store.list_for_booking(booking_id).await.unwrap();
        let sent = records
            .iter()
            .filter(|n| n.status == NotificationStatus::Sent)
            .count();
        assert_eq!(sent, 2);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let store = Arc::new(InMemoryNotificationStore::new());
        // No workers: nothing drains the single-slot queue
        let (sender, _dispatcher) = NotificationDispatcher::spawn(
            store.clone(),
            vec![FixtureProvider::ok(Channel::Email)],
            fast_gateway(),
            DispatcherConfig {
                queue_capacity: 1,
                worker_count: 0,
                dedup_window_minutes: 10,
            },
        );

        let booking_id = Uuid::new_v4();
        assert!(sender.enqueue(request(booking_id, false)));
        assert!(!sender.enqueue(request(booking_id, false)));
    }
}
