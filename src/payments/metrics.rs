// Reconciliation metrics
//
// In-process counters for the payment webhook pipeline, kept separately for
// each event type: volumes per disposition, success and error rates, retry
// pressure, and processing latency. Exposed read-only via the metrics
// endpoint.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use utoipa::ToSchema;

use crate::payments::PaymentEventType;

/// Reconciler metrics shared across handlers
#[derive(Debug, Clone, Default)]
pub struct ReconcilerMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    succeeded: TypeCounters,
    failed: TypeCounters,
}

#[derive(Debug, Default)]
struct TypeCounters {
    received: AtomicU64,
    applied: AtomicU64,
    duplicate: AtomicU64,
    superseded: AtomicU64,
    dead_lettered: AtomicU64,
    retries: AtomicU64,
    processing_time_us: AtomicU64,
}

impl MetricsInner {
    fn counters(&self, event_type: PaymentEventType) -> &TypeCounters {
        match event_type {
            PaymentEventType::PaymentSucceeded => &self.succeeded,
            PaymentEventType::PaymentFailed => &self.failed,
        }
    }
}

impl ReconcilerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self, event_type: PaymentEventType) {
        self.inner
            .counters(event_type)
            .received
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_applied(&self, event_type: PaymentEventType) {
        self.inner
            .counters(event_type)
            .applied
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self, event_type: PaymentEventType) {
        self.inner
            .counters(event_type)
            .duplicate
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_superseded(&self, event_type: PaymentEventType) {
        self.inner
            .counters(event_type)
            .superseded
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self, event_type: PaymentEventType) {
        self.inner
            .counters(event_type)
            .dead_lettered
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self, event_type: PaymentEventType) {
        self.inner
            .counters(event_type)
            .retries
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processing_time(&self, event_type: PaymentEventType, duration: Duration) {
        self.inner
            .counters(event_type)
            .processing_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Start timing one event's processing
    pub fn start_timer(&self, event_type: PaymentEventType) -> ProcessingTimer {
        ProcessingTimer {
            start: Instant::now(),
            event_type,
            metrics: self.clone(),
        }
    }

    fn type_summary(&self, event_type: PaymentEventType) -> EventTypeMetrics {
        let counters = self.inner.counters(event_type);
        let total_processed = counters.received.load(Ordering::Relaxed);
        let applied = counters.applied.load(Ordering::Relaxed);
        let duplicate = counters.duplicate.load(Ordering::Relaxed);
        let superseded = counters.superseded.load(Ordering::Relaxed);
        let dead_lettered = counters.dead_lettered.load(Ordering::Relaxed);
        let retries = counters.retries.load(Ordering::Relaxed);
        let time_us = counters.processing_time_us.load(Ordering::Relaxed);

        let rate = |n: u64| {
            if total_processed == 0 {
                0.0
            } else {
                n as f64 / total_processed as f64
            }
        };

        EventTypeMetrics {
            event_type,
            total_processed,
            applied,
            duplicate,
            superseded,
            dead_lettered,
            success_rate: rate(applied),
            error_rate: rate(dead_lettered),
            retry_rate: rate(retries),
            avg_processing_time_ms: if total_processed == 0 {
                0.0
            } else {
                (time_us as f64 / total_processed as f64) / 1000.0
            },
        }
    }

    pub fn summary(&self) -> ReconcilerMetricsSummary {
        let both = |f: fn(&TypeCounters) -> &AtomicU64| {
            f(&self.inner.succeeded).load(Ordering::Relaxed)
                + f(&self.inner.failed).load(Ordering::Relaxed)
        };
        let events_received = both(|c| &c.received);
        let retries = both(|c| &c.retries);
        let total_time_us = both(|c| &c.processing_time_us);

        ReconcilerMetricsSummary {
            events_received,
            events_applied: both(|c| &c.applied),
            events_duplicate: both(|c| &c.duplicate),
            events_superseded: both(|c| &c.superseded),
            events_dead_lettered: both(|c| &c.dead_lettered),
            retries,
            retry_rate: if events_received == 0 {
                0.0
            } else {
                retries as f64 / events_received as f64
            },
            avg_processing_time_ms: if events_received == 0 {
                0.0
            } else {
                (total_time_us as f64 / events_received as f64) / 1000.0
            },
            per_event_type: vec![
                self.type_summary(PaymentEventType::PaymentSucceeded),
                self.type_summary(PaymentEventType::PaymentFailed),
            ],
        }
    }
}

/// Timer recording total processing time on drop
pub struct ProcessingTimer {
    start: Instant,
    event_type: PaymentEventType,
    metrics: ReconcilerMetrics,
}

impl Drop for ProcessingTimer {
    fn drop(&mut self) {
        self.metrics
            .record_processing_time(self.event_type, self.start.elapsed());
    }
}

/// Rolling counters for one event type
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EventTypeMetrics {
    pub event_type: PaymentEventType,
    pub total_processed: u64,
    pub applied: u64,
    pub duplicate: u64,
    pub superseded: u64,
    pub dead_lettered: u64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub retry_rate: f64,
    pub avg_processing_time_ms: f64,
}

/// Point-in-time snapshot of the reconciler counters
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReconcilerMetricsSummary {
    pub events_received: u64,
    pub events_applied: u64,
    pub events_duplicate: u64,
    pub events_superseded: u64,
    pub events_dead_lettered: u64,
    pub retries: u64,
    pub retry_rate: f64,
    pub avg_processing_time_ms: f64,
    pub per_event_type: Vec<EventTypeMetrics>,
}
