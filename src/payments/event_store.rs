use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::payments::{ProcessedWebhookEvent, ProcessingOutcome};

/// Storage boundary for processed webhook events
#[async_trait]
pub trait WebhookEventStore: Send + Sync {
    /// Record the first sight of an event id
    ///
    /// Returns `false` when the id was already recorded; the insert and the
    /// duplicate check are a single atomic step.
    async fn insert_first_sight(&self, event: ProcessedWebhookEvent) -> Result<bool, String>;

    async fn update_outcome(
        &self,
        event_id: &str,
        outcome: ProcessingOutcome,
        detail: Option<&str>,
    ) -> Result<(), String>;

    async fn get(&self, event_id: &str) -> Result<Option<ProcessedWebhookEvent>, String>;
}

/// In-memory webhook event store
#[derive(Default)]
pub struct InMemoryWebhookEventStore {
    events: Mutex<HashMap<String, ProcessedWebhookEvent>>,
}

impl InMemoryWebhookEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookEventStore for InMemoryWebhookEventStore {
    async fn insert_first_sight(&self, event: ProcessedWebhookEvent) -> Result<bool, String> {
        let mut events = self.events.lock().await;
        if events.contains_key(&event.event_id) {
            return Ok(false);
        }
        events.insert(event.event_id.clone(), event);
        Ok(true)
    }

    async fn update_outcome(
        &self,
        event_id: &str,
        outcome: ProcessingOutcome,
        detail: Option<&str>,
    ) -> Result<(), String> {
        let mut events = self.events.lock().await;
        let event = events
            .get_mut(event_id)
            .ok_or_else(|| format!("event {} not found", event_id))?;
        event.outcome = outcome;
        event.detail = detail.map(|d| d.to_string());
        Ok(())
    }

    async fn get(&self, event_id: &str) -> Result<Option<ProcessedWebhookEvent>, String> {
        Ok(self.events.lock().await.get(event_id).cloned())
    }
}

/// PostgreSQL webhook event store
///
/// First-sight semantics come from `ON CONFLICT DO NOTHING` against the
/// primary key, so concurrent redeliveries of one event id race safely.
#[derive(Clone)]
pub struct PgWebhookEventStore {
    pool: PgPool,
}

impl PgWebhookEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookEventStore for PgWebhookEventStore {
    async fn insert_first_sight(&self, event: ProcessedWebhookEvent) -> Result<bool, String> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_webhook_events
                (event_id, event_type, payment_intent_id, outcome, detail, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&event.event_id)
        .bind(event.event_type)
        .bind(&event.payment_intent_id)
        .bind(event.outcome)
        .bind(&event.detail)
        .bind(event.processed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| e.to_string())?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_outcome(
        &self,
        event_id: &str,
        outcome: ProcessingOutcome,
        detail: Option<&str>,
    ) -> Result<(), String> {
        sqlx::query(
            "UPDATE processed_webhook_events SET outcome = $1, detail = $2 WHERE event_id = $3",
        )
        .bind(outcome)
        .bind(detail)
        .bind(event_id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn get(&self, event_id: &str) -> Result<Option<ProcessedWebhookEvent>, String> {
        sqlx::query_as::<_, ProcessedWebhookEvent>(
            "SELECT event_id, event_type, payment_intent_id, outcome, detail, processed_at \
             FROM processed_webhook_events WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| e.to_string())
    }
}
