use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::notifications::{
    Channel, DeadLetterEntry, NotificationStatus, NotificationType, OutboundNotification,
};

/// Storage boundary for outbound notifications
///
/// The dedup check and the dead-letter queue both live here so the dispatcher
/// stays storage-agnostic.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: OutboundNotification) -> Result<(), String>;

    async fn mark_sent(&self, id: Uuid) -> Result<(), String>;

    async fn mark_failed(&self, id: Uuid, attempt_count: i32, error: &str) -> Result<(), String>;

    /// Whether a notification with the same (booking, type, channel) key was
    /// already sent at or after `since`.
    async fn sent_since(
        &self,
        booking_id: Uuid,
        notification_type: NotificationType,
        channel: Channel,
        since: DateTime<Utc>,
    ) -> Result<bool, String>;

    async fn push_dead_letter(&self, entry: DeadLetterEntry) -> Result<(), String>;

    async fn list_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Vec<OutboundNotification>, String>;

    async fn dead_letters(&self) -> Result<Vec<DeadLetterEntry>, String>;
}

/// In-memory notification store
#[derive(Default)]
pub struct InMemoryNotificationStore {
    notifications: Mutex<Vec<OutboundNotification>>,
    dead_letters: Mutex<Vec<DeadLetterEntry>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn insert(&self, notification: OutboundNotification) -> Result<(), String> {
        self.notifications.lock().await.push(notification);
        Ok(())
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), String> {
        let mut notifications = self.notifications.lock().await;
        let entry = notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| format!("notification {} not found", id))?;
        entry.status = NotificationStatus::Sent;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, attempt_count: i32, error: &str) -> Result<(), String> {
        let mut notifications = self.notifications.lock().await;
        let entry = notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| format!("notification {} not found", id))?;
        entry.status = NotificationStatus::Failed;
        entry.attempt_count = attempt_count;
        entry.last_error = Some(error.to_string());
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn sent_since(
        &self,
        booking_id: Uuid,
        notification_type: NotificationType,
        channel: Channel,
        since: DateTime<Utc>,
    ) -> Result<bool, String> {
        Ok(self.notifications.lock().await.iter().any(|n| {
            n.booking_id == booking_id
                && n.notification_type == notification_type
                && n.channel == channel
                && n.status == NotificationStatus::Sent
                && n.updated_at >= since
        }))
    }

    async fn push_dead_letter(&self, entry: DeadLetterEntry) -> Result<(), String> {
        self.dead_letters.lock().await.push(entry);
        Ok(())
    }

    async fn list_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Vec<OutboundNotification>, String> {
        Ok(self
            .notifications
            .lock()
            .await
            .iter()
            .filter(|n| n.booking_id == booking_id)
            .cloned()
            .collect())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetterEntry>, String> {
        Ok(self.dead_letters.lock().await.clone())
    }
}

/// PostgreSQL notification store
#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const NOTIFICATION_COLUMNS: &str = "id, booking_id, notification_type, channel, recipient, \
     subject, body, status, attempt_count, last_error, created_at, updated_at";

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn insert(&self, notification: OutboundNotification) -> Result<(), String> {
        sqlx::query(
            r#"
            INSERT INTO outbound_notifications (
                id, booking_id, notification_type, channel, recipient, subject,
                body, status, attempt_count, last_error, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(notification.id)
        .bind(notification.booking_id)
        .bind(notification.notification_type)
        .bind(notification.channel)
        .bind(&notification.recipient)
        .bind(&notification.subject)
        .bind(&notification.body)
        .bind(notification.status)
        .bind(notification.attempt_count)
        .bind(&notification.last_error)
        .bind(notification.created_at)
        .bind(notification.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), String> {
        sqlx::query(
            "UPDATE outbound_notifications SET status = 'sent', updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, attempt_count: i32, error: &str) -> Result<(), String> {
        sqlx::query(
            r#"
            UPDATE outbound_notifications
            SET status = 'failed', attempt_count = $1, last_error = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(attempt_count)
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn sent_since(
        &self,
        booking_id: Uuid,
        notification_type: NotificationType,
        channel: Channel,
        since: DateTime<Utc>,
    ) -> Result<bool, String> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM outbound_notifications
            WHERE booking_id = $1
              AND notification_type = $2
              AND channel = $3
              AND status = 'sent'
              AND updated_at >= $4
            "#,
        )
        .bind(booking_id)
        .bind(notification_type)
        .bind(channel)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.to_string())?;
        Ok(count > 0)
    }

    async fn push_dead_letter(&self, entry: DeadLetterEntry) -> Result<(), String> {
        sqlx::query(
            r#"
            INSERT INTO notification_dead_letters (id, booking_id, notification_type, reason, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.id)
        .bind(entry.booking_id)
        .bind(entry.notification_type)
        .bind(&entry.reason)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn list_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Vec<OutboundNotification>, String> {
        sqlx::query_as::<_, OutboundNotification>(&format!(
            "SELECT {} FROM outbound_notifications WHERE booking_id = $1 ORDER BY created_at",
            NOTIFICATION_COLUMNS
        ))
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.to_string())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetterEntry>, String> {
        sqlx::query_as::<_, DeadLetterEntry>(
            "SELECT id, booking_id, notification_type, reason, created_at \
             FROM notification_dead_letters ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.to_string())
    }
}
