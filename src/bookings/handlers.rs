// HTTP handlers for availability, pricing and booking endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::bookings::{
    BookingResponse, CancelBookingRequest, CreateBookingRequest, UpdateBookingStatusRequest,
};
use crate::error::ApiError;
use crate::models::Slot;
use crate::pricing::{PricingEngine, Quote};

/// Query parameters for availability resolution
#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub service_id: String,
    pub resource_id: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Response body for availability resolution
#[derive(Debug, Serialize, ToSchema)]
pub struct AvailabilityResponse {
    pub service_id: String,
    pub resource_id: String,
    pub slots: Vec<Slot>,
}

/// Request body for a standalone price quote
#[derive(Debug, Deserialize, ToSchema)]
pub struct QuoteRequest {
    pub service_id: String,
    pub distance_miles: f64,
    pub promo_code: Option<String>,
}

/// Handler for GET /api/availability
/// Resolves bookable candidate slots for a service over a window
#[utoipa::path(
    get,
    path = "/api/availability",
    params(
        ("service_id" = String, Query, description = "Service identifier"),
        ("resource_id" = String, Query, description = "Notary resource identifier"),
        ("from" = String, Query, description = "Window start (RFC 3339)"),
        ("to" = String, Query, description = "Window end (RFC 3339)")
    ),
    responses(
        (status = 200, description = "Candidate slots", body = AvailabilityResponse),
        (status = 404, description = "Unknown service"),
        (status = 503, description = "Availability could not be determined")
    ),
    tag = "availability"
)]
pub async fn get_availability_handler(
    State(state): State<crate::AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    tracing::debug!(
        service_id = %query.service_id,
        resource_id = %query.resource_id,
        "resolving availability"
    );

    let slots = state
        .bookings
        .resolve_availability(&query.service_id, &query.resource_id, query.from, query.to)
        .await?;

    Ok(Json(AvailabilityResponse {
        service_id: query.service_id,
        resource_id: query.resource_id,
        slots,
    }))
}

/// Handler for POST /api/pricing/quote
/// Computes a price quote without creating a booking
#[utoipa::path(
    post,
    path = "/api/pricing/quote",
    request_body = QuoteRequest,
    responses(
        (status = 200, description = "Price quote", body = Quote),
        (status = 400, description = "Invalid input"),
        (status = 404, description = "Unknown service")
    ),
    tag = "pricing"
)]
pub async fn quote_handler(
    State(state): State<crate::AppState>,
    Json(request): Json<QuoteRequest>,
) -> Result<Json<Quote>, ApiError> {
    crate::validation::validate_distance_miles(request.distance_miles)
        .map_err(|e| ApiError::BadRequest(e.code.to_string()))?;

    let service = state
        .bookings
        .catalog()
        .get_active(&request.service_id)
        .ok_or_else(|| ApiError::NotFound {
            resource: "Service".to_string(),
            id: request.service_id.clone(),
        })?;

    let now = Utc::now();
    let promo = match &request.promo_code {
        Some(code) => {
            let promo = state
                .bookings
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

    let quote = PricingEngine::price(service, request.distance_miles, promo.as_ref(), now);
    Ok(Json(quote))
}

/// Handler for POST /api/bookings
/// Creates a booking: revalidates the slot, reserves it, provisions the
/// calendar event and payment intent
#[utoipa::path(
    post,
    path = "/api/bookings",
    request_body = CreateBookingRequest,
    responses(
        (status = 201, description = "Booking created, awaiting payment", body = BookingResponse),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Slot no longer available"),
        (status = 502, description = "Upstream provider failure")
    ),
    tag = "bookings"
)]
pub async fn create_booking_handler(
    State(state): State<crate::AppState>,
    Json(request): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingResponse>), ApiError> {
    let (booking, client_secret) = state.bookings.create_booking(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(BookingResponse::from_booking(booking, client_secret)),
    ))
}

/// Handler for GET /api/bookings/:id
#[utoipa::path(
    get,
    path = "/api/bookings/{id}",
    params(("id" = Uuid, Path, description = "Booking ID")),
    responses(
        (status = 200, description = "Booking found", body = BookingResponse),
        (status = 404, description = "Booking not found")
    ),
    tag = "bookings"
)]
pub async fn get_booking_handler(
    State(state): State<crate::AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BookingResponse>, ApiError> {
    let booking = state.bookings.get_booking(id).await?;
    Ok(Json(BookingResponse::from_booking(booking, None)))
}

/// Handler for POST /api/bookings/:id/cancel
/// Cancels a booking on behalf of the client or the business
#[utoipa::path(
    post,
    path = "/api/bookings/{id}/cancel",
    params(("id" = Uuid, Path, description = "Booking ID")),
    request_body = CancelBookingRequest,
    responses(
        (status = 200, description = "Booking cancelled", body = BookingResponse),
        (status = 404, description = "Booking not found"),
        (status = 409, description = "Booking cannot be cancelled from its current status")
    ),
    tag = "bookings"
)]
pub async fn cancel_booking_handler(
    State(state): State<crate::AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CancelBookingRequest>,
) -> Result<Json<BookingResponse>, ApiError> {
    let booking = state.bookings.cancel_booking(id, request).await?;
    Ok(Json(BookingResponse::from_booking(booking, None)))
}

/// Handler for PATCH /api/bookings/:id/status
/// Staff-driven lifecycle updates (start, complete)
#[utoipa::path(
    patch,
    path = "/api/bookings/{id}/status",
    params(("id" = Uuid, Path, description = "Booking ID")),
    request_body = UpdateBookingStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = BookingResponse),
        (status = 400, description = "Status not directly settable"),
        (status = 409, description = "Invalid transition")
    ),
    tag = "bookings"
)]
pub async fn update_booking_status_handler(
    State(state): State<crate::AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateBookingStatusRequest>,
) -> Result<Json<BookingResponse>, ApiError> {
    let booking = state.bookings.update_status(id, request.status).await?;
    Ok(Json(BookingResponse::from_booking(booking, None)))
}
