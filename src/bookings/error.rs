use crate::error::ApiError;

/// Error types for booking operations
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Booking not found")]
    NotFound,

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Slot no longer available")]
    SlotNoLongerAvailable,

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("Stale transition: expected status {expected}, found {actual}")]
    StaleTransition { expected: String, actual: String },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<sqlx::Error> for BookingError {
    fn from(err: sqlx::Error) -> Self {
        // An exclusion (23P01) or unique (23505) violation on insert means a
        // concurrent booking won the slot.
        if let sqlx::Error::Database(db_err) = &err {
            if let Some(code) = db_err.code() {
                if code == "23P01" || code == "23505" {
                    return BookingError::SlotNoLongerAvailable;
                }
            }
        }
        BookingError::DatabaseError(err.to_string())
    }
}

impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::DatabaseError(msg) => ApiError::InternalError(msg),
            BookingError::NotFound => ApiError::NotFound {
                resource: "Booking".to_string(),
                id: "unknown".to_string(),
            },
            BookingError::ServiceNotFound(id) => ApiError::NotFound {
                resource: "Service".to_string(),
                id,
            },
            BookingError::SlotNoLongerAvailable => ApiError::SlotNoLongerAvailable,
            BookingError::InvalidTransition(msg) => ApiError::BadRequest(msg),
            BookingError::StaleTransition { expected, actual } => ApiError::Conflict {
                message: format!(
                    "A competing update committed first (expected {}, found {})",
                    expected, actual
                ),
            },
            BookingError::ValidationError(msg) => ApiError::BadRequest(msg),
        }
    }
}
