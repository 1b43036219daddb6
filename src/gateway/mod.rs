// Rate-limited gateway for all outbound provider calls
//
// Every external call (calendar, payment, notification providers) goes
// through one explicitly constructed gateway instance: token-bucket limited
// per endpoint key, timeout-bounded per attempt, retried with exponential
// backoff and jitter up to a fixed attempt count.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

/// How a caller wants over-capacity requests handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Wait in a capped FIFO queue for the next token
    Queue,
    /// Fail immediately when no token is available
    Reject,
}

/// Error raised by a provider call closure
///
/// The gateway retries `Retryable` failures (timeouts, 5xx-class responses)
/// and surfaces `Fatal` failures (4xx-class, declines) unchanged.
#[derive(Debug, Error)]
pub enum ProviderCallError {
    #[error("{0}")]
    Retryable(String),
    #[error("{0}")]
    Fatal(String),
}

/// Gateway-level errors surfaced to callers
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("rate limit exceeded for endpoint {0}")]
    RateLimited(String),

    #[error("request queue full for endpoint {0}")]
    QueueFull(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("provider call to {endpoint} failed after {attempts} attempts: {message}")]
    Exhausted {
        endpoint: String,
        attempts: u32,
        message: String,
    },
}

impl GatewayError {
    /// Whether the failure was transient (retry budget exhausted) rather
    /// than a definitive provider answer.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimited(_)
                | GatewayError::QueueFull(_)
                | GatewayError::Exhausted { .. }
        )
    }
}

/// Retry policy shared by all endpoints
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with jitter to avoid thundering herds
    pub fn backoff(&self, retry_attempt: u32) -> Duration {
        let base_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powf(retry_attempt as f64))
        .min(self.max_backoff_ms as f64);
        let jitter = rand::random::<f64>() * self.jitter_factor * base_ms;
        Duration::from_millis((base_ms + jitter) as u64)
    }
}

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Token bucket capacity per endpoint key
    pub bucket_capacity: f64,
    /// Tokens added per second per endpoint key
    pub refill_per_second: f64,
    /// Maximum callers waiting for a token per endpoint key
    pub queue_limit: usize,
    /// Hard timeout applied to every individual attempt
    pub attempt_timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bucket_capacity: 10.0,
            refill_per_second: 5.0,
            queue_limit: 32,
            attempt_timeout_ms: 5_000,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    queued: usize,
}

/// Throttled, queued, timeout-bounded wrapper around outbound provider calls
///
/// Constructed once at startup and injected wherever outbound calls are made.
/// Counters are in-process shared state behind a lock.
#[derive(Debug)]
pub struct RateLimitedGateway {
    config: GatewayConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimitedGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Execute a provider call under the endpoint's rate limit
    ///
    /// The closure is re-invoked on retry, so it must be cheap to rebuild the
    /// request. Timeouts and retryable provider errors are retried with
    /// backoff; fatal errors and exhausted budgets are surfaced as typed
    /// errors.
    pub async fn call<T, F, Fut>(
        &self,
        endpoint: &str,
        policy: QueuePolicy,
        f: F,
    ) -> Result<T, GatewayError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderCallError>>,
    {
        self.acquire_token(endpoint, policy).await?;

        let attempt_timeout = Duration::from_millis(self.config.attempt_timeout_ms);
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut last_failure = String::new();

        for attempt in 0..max_attempts {
            match tokio::time::timeout(attempt_timeout, f()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(ProviderCallError::Fatal(message))) => {
                    tracing::warn!(endpoint, %message, "provider returned non-retryable error");
                    return Err(GatewayError::Provider(message));
                }
                Ok(Err(ProviderCallError::Retryable(message))) => {
                    tracing::warn!(endpoint, attempt, %message, "retryable provider error");
                    last_failure = message;
                }
                Err(_) => {
                    tracing::warn!(endpoint, attempt, "provider call timed out");
                    last_failure = format!("timed out after {}ms", self.config.attempt_timeout_ms);
                }
            }

            if attempt + 1 < max_attempts {
                tokio::time::sleep(self.config.retry.backoff(attempt)).await;
            }
        }

        Err(GatewayError::Exhausted {
            endpoint: endpoint.to_string(),
            attempts: max_attempts,
            message: last_failure,
        })
    }

    /// Take one token for the endpoint, waiting if the caller tolerates it
    async fn acquire_token(&self, endpoint: &str, policy: QueuePolicy) -> Result<(), GatewayError> {
        let mut waiting = false;
        loop {
            let wait_for = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets.entry(endpoint.to_string()).or_insert_with(|| Bucket {
                    tokens: self.config.bucket_capacity,
                    last_refill: Instant::now(),
                    queued: 0,
                });

                let elapsed = bucket.last_refill.elapsed().as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.config.refill_per_second)
                    .min(self.config.bucket_capacity);
                bucket.last_refill = Instant::now();

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    if waiting {
                        bucket.queued = bucket.queued.saturating_sub(1);
                    }
                    return Ok(());
                }

                match policy {
                    QueuePolicy::Reject => {
                        return Err(GatewayError::RateLimited(endpoint.to_string()));
                    }
                    QueuePolicy::Queue => {
                        if !waiting {
                            if bucket.queued >= self.config.queue_limit {
                                return Err(GatewayError::QueueFull(endpoint.to_string()));
                            }
                            bucket.queued += 1;
                            waiting = true;
                        }
                        // Time until the next whole token is available
                        let deficit = 1.0 - bucket.tokens;
                        Duration::from_secs_f64(deficit / self.config.refill_per_second.max(0.001))
                    }
                }
            };

            tokio::time::sleep(wait_for).await;
        }
    }
}
