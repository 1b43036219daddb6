// Error handling module for the booking engine API surface
// Provides centralized error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, warn};

/// Main error type for the API surface
///
/// All handlers return `Result<T, ApiError>`. Each variant maps to a specific
/// HTTP status code and a machine-readable error code; internal detail is
/// logged and filtered from client responses.
#[derive(Debug)]
pub enum ApiError {
    /// Validation errors from request validation, HTTP 400
    ValidationError(validator::ValidationErrors),

    /// Malformed or semantically invalid input that is not retried, HTTP 400
    BadRequest(String),

    /// Resource not found by ID, HTTP 404
    NotFound { resource: String, id: String },

    /// The requested slot was taken by a concurrent booking, HTTP 409.
    /// The caller should re-resolve availability and pick another time.
    SlotNoLongerAvailable,

    /// A competing transition committed first, HTTP 409
    Conflict { message: String },

    /// External availability could not be determined within the retry
    /// budget, HTTP 503. Distinct from "no slots".
    AvailabilityDegraded(String),

    /// Outbound provider call exhausted its retry budget, HTTP 502
    ProviderError(String),

    /// The payment provider declined the attempt, HTTP 402
    PaymentDeclined(String),

    /// Database operation errors, HTTP 500
    DatabaseError(sqlx::Error),

    /// Internal server errors, HTTP 500
    InternalError(String),
}

/// Consistent error response structure
///
/// Ensures all error types share one JSON shape with both machine-readable
/// (`error_code`) and human-readable (`message`) fields.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = self.to_error_response();
        (status, Json(error_response)).into_response()
    }
}

impl ApiError {
    fn to_error_response(&self) -> (StatusCode, ErrorResponse) {
        let timestamp = Utc::now().to_rfc3339();
        match self {
            ApiError::ValidationError(errors) => {
                debug!("Validation error: {:?}", errors);
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse {
                        error_code: "VALIDATION_ERROR".to_string(),
                        message: "Request validation failed".to_string(),
                        details: Some(
                            serde_json::to_value(errors).unwrap_or(serde_json::json!({})),
                        ),
                        timestamp,
                    },
                )
            }
            ApiError::BadRequest(message) => {
                debug!("Bad request: {}", message);
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse {
                        error_code: "VALIDATION_ERROR".to_string(),
                        message: message.clone(),
                        details: None,
                        timestamp,
                    },
                )
            }
            ApiError::NotFound { resource, id } => {
                debug!("Resource not found: {} with id {}", resource, id);
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse {
                        error_code: "NOT_FOUND".to_string(),
                        message: format!("{} with id {} not found", resource, id),
                        details: None,
                        timestamp,
                    },
                )
            }
            ApiError::SlotNoLongerAvailable => {
                warn!("Slot reservation lost to a concurrent booking");
                (
                    StatusCode::CONFLICT,
                    ErrorResponse {
                        error_code: "SLOT_NO_LONGER_AVAILABLE".to_string(),
                        message: "This time slot was just booked. Please pick another time."
                            .to_string(),
                        details: None,
                        timestamp,
                    },
                )
            }
            ApiError::Conflict { message } => {
                warn!("Conflicting transition: {}", message);
                (
                    StatusCode::CONFLICT,
                    ErrorResponse {
                        error_code: "CONFLICT".to_string(),
                        message: message.clone(),
                        details: None,
                        timestamp,
                    },
                )
            }
            ApiError::AvailabilityDegraded(detail) => {
                warn!("Availability degraded: {}", detail);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorResponse {
                        error_code: "AVAILABILITY_DEGRADED".to_string(),
                        message: "Availability could not be determined. Please try again shortly."
                            .to_string(),
                        details: None,
                        timestamp,
                    },
                )
            }
            ApiError::ProviderError(detail) => {
                error!("Provider error: {}", detail);
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorResponse {
                        error_code: "PROVIDER_ERROR".to_string(),
                        message: "An upstream provider is unavailable".to_string(),
                        details: None,
                        timestamp,
                    },
                )
            }
            ApiError::PaymentDeclined(reason) => {
                warn!("Payment declined: {}", reason);
                (
                    StatusCode::PAYMENT_REQUIRED,
                    ErrorResponse {
                        error_code: "PAYMENT_DECLINED".to_string(),
                        message: "Payment was declined. A new booking attempt is required."
                            .to_string(),
                        details: None,
                        timestamp,
                    },
                )
            }
            ApiError::DatabaseError(db_error) => {
                // Full detail stays in the logs, never in the response
                error!("Database error: {:?}", db_error);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error_code: "DATABASE_ERROR".to_string(),
                        message: "A database error occurred".to_string(),
                        details: None,
                        timestamp,
                    },
                )
            }
            ApiError::InternalError(internal_msg) => {
                error!("Internal error: {}", internal_msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error_code: "INTERNAL_ERROR".to_string(),
                        message: "An internal server error occurred".to_string(),
                        details: None,
                        timestamp,
                    },
                )
            }
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::ValidationError(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::SlotNoLongerAvailable | ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::AvailabilityDegraded(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ProviderError(_) => StatusCode::BAD_GATEWAY,
            ApiError::PaymentDeclined(_) => StatusCode::PAYMENT_REQUIRED,
            ApiError::DatabaseError(_) | ApiError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(error: sqlx::Error) -> Self {
        ApiError::DatabaseError(error)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::SlotNoLongerAvailable.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::AvailabilityDegraded("calendar down".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::PaymentDeclined("card_declined".to_string()).status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ApiError::BadRequest("bad slot".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
