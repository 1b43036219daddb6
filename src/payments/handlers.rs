// HTTP handlers for the payment webhook and reconciler metrics

use axum::{extract::State, http::HeaderMap, Json};
use serde::Serialize;
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::payments::{ReconcilerMetricsSummary, WebhookDisposition, WebhookEvent};

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Acknowledgement body returned to the payment provider
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub disposition: WebhookDisposition,
}

/// Compute the expected webhook signature for a raw body
///
/// The provider signs `"{secret}.{body}"` with SHA-256 and sends the lowercase
/// hex digest.
pub fn compute_signature(secret: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b".");
    hasher.update(body.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Handler for POST /webhooks/payment
///
/// Verifies the signature over the raw body before parsing. Duplicates and
/// superseded events are acknowledged with 200 so the provider stops
/// redelivering them.
#[utoipa::path(
    post,
    path = "/webhooks/payment",
    request_body = WebhookEvent,
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookAck),
        (status = 400, description = "Bad signature or malformed payload")
    ),
    tag = "webhooks"
)]
pub async fn payment_webhook_handler(
    State(state): State<crate::AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookAck>, ApiError> {
    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing webhook signature".to_string()))?;

    let expected = compute_signature(&state.webhook_secret, &body);
    if provided != expected {
        tracing::warn!("webhook delivery with invalid signature rejected");
        return Err(ApiError::BadRequest(
            "Invalid webhook signature".to_string(),
        ));
    }

    let event: WebhookEvent = serde_json::from_str(&body)
        .map_err(|e| ApiError::BadRequest(format!("Malformed webhook payload: {}", e)))?;

    let disposition = state.reconciler.handle_event(event).await?;
    Ok(Json(WebhookAck { disposition }))
}

/// Handler for GET /api/metrics/reconciler
#[utoipa::path(
    get,
    path = "/api/metrics/reconciler",
    responses(
        (status = 200, description = "Reconciler counters", body = ReconcilerMetricsSummary)
    ),
    tag = "metrics"
)]
pub async fn reconciler_metrics_handler(
    State(state): State<crate::AppState>,
) -> Json<ReconcilerMetricsSummary> {
    Json(state.reconciler.metrics().summary())
}
