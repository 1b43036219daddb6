// Validation utilities module
// Provides custom validation functions for domain-specific rules

use validator::ValidationError;

/// Validate that a distance input is non-negative and within the service area
///
/// Distance is supplied by an external geocoding collaborator; this engine
/// only sanity-checks the value.
pub fn validate_distance_miles(distance: f64) -> Result<(), ValidationError> {
    if !distance.is_finite() || distance < 0.0 {
        return Err(ValidationError::new("distance_must_be_non_negative"));
    }
    if distance > 200.0 {
        return Err(ValidationError::new("distance_outside_service_area"));
    }
    Ok(())
}

/// Validate a timezone offset in minutes (UTC-12:00 to UTC+14:00)
pub fn validate_tz_offset_minutes(offset: i32) -> Result<(), ValidationError> {
    if !(-12 * 60..=14 * 60).contains(&offset) {
        return Err(ValidationError::new("invalid_timezone_offset"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_bounds() {
        assert!(validate_distance_miles(0.0).is_ok());
        assert!(validate_distance_miles(28.0).is_ok());
        assert!(validate_distance_miles(-1.0).is_err());
        assert!(validate_distance_miles(f64::NAN).is_err());
        assert!(validate_distance_miles(500.0).is_err());
    }

    #[test]
    fn test_tz_offset_bounds() {
        assert!(validate_tz_offset_minutes(0).is_ok());
        assert!(validate_tz_offset_minutes(-360).is_ok());
        assert!(validate_tz_offset_minutes(14 * 60).is_ok());
        assert!(validate_tz_offset_minutes(15 * 60).is_err());
    }
}
