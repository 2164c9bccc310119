//! Result-based field validation shared by the catalog and the sync
//! pipeline.

use thiserror::Error;

/// Structured rejection detail: which field, what value, and why.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field '{field}' rejected (value '{value}'): {reason}")]
pub struct FieldError {
    pub field: &'static str,
    pub value: String,
    pub reason: &'static str,
}

impl FieldError {
    fn new(field: &'static str, value: impl ToString, reason: &'static str) -> Self {
        Self {
            field,
            value: value.to_string(),
            reason,
        }
    }
}

/// WGS84 range checks plus rejection of the (0, 0) missing-coordinate
/// sentinel some upstreams emit instead of null.
pub fn check_coordinates(latitude: f64, longitude: f64) -> Result<(), FieldError> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(FieldError::new(
            "latitude",
            latitude,
            "must be within [-90, 90]",
        ));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(FieldError::new(
            "longitude",
            longitude,
            "must be within [-180, 180]",
        ));
    }
    if latitude == 0.0 && longitude == 0.0 {
        return Err(FieldError::new(
            "coordinates",
            "(0, 0)",
            "zero-zero is a missing-coordinate sentinel, not a location",
        ));
    }
    Ok(())
}

pub fn check_name(name: &str) -> Result<(), FieldError> {
    if name.trim().is_empty() {
        return Err(FieldError::new("name", name, "must not be empty"));
    }
    Ok(())
}

pub fn check_raw_id(raw_id: &str) -> Result<(), FieldError> {
    if raw_id.trim().is_empty() {
        return Err(FieldError::new("raw_id", raw_id, "must not be empty"));
    }
    Ok(())
}

/// Same non-empty rule for an already-prefixed global site id, reported
/// against the right field name.
pub fn check_site_id(site_id: &str) -> Result<(), FieldError> {
    if site_id.trim().is_empty() {
        return Err(FieldError::new("site_id", site_id, "must not be empty"));
    }
    Ok(())
}

/// Drainage areas that are missing, non-finite, or non-positive are
/// unknown, not errors. They are cleared rather than stored as zero.
pub fn sanitize_area(area: Option<f64>) -> Option<f64> {
    match area {
        Some(v) if v.is_finite() && v > 0.0 => Some(v),
        _ => None,
    }
}

/// Negative or non-finite measurement values are invalid and must be
/// rejected, not clamped.
pub fn check_value(value: f64) -> Result<(), FieldError> {
    if !value.is_finite() {
        return Err(FieldError::new("value", value, "must be a finite number"));
    }
    if value < 0.0 {
        return Err(FieldError::new("value", value, "must not be negative"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_ranges_are_enforced() {
        assert!(check_coordinates(38.97, -90.43).is_ok());
        assert!(check_coordinates(-90.0, 180.0).is_ok());
        assert_eq!(
            check_coordinates(91.0, 0.0).unwrap_err().field,
            "latitude"
        );
        assert_eq!(
            check_coordinates(45.0, -181.0).unwrap_err().field,
            "longitude"
        );
        assert_eq!(
            check_coordinates(f64::NAN, 10.0).unwrap_err().field,
            "latitude"
        );
    }

    #[test]
    fn zero_zero_is_rejected_as_sentinel() {
        let err = check_coordinates(0.0, 0.0).unwrap_err();
        assert_eq!(err.field, "coordinates");
    }

    #[test]
    fn zero_latitude_alone_is_a_real_location() {
        assert!(check_coordinates(0.0, -78.5).is_ok());
    }

    #[test]
    fn area_is_cleared_not_zeroed() {
        assert_eq!(sanitize_area(Some(120.5)), Some(120.5));
        assert_eq!(sanitize_area(Some(0.0)), None);
        assert_eq!(sanitize_area(Some(-3.0)), None);
        assert_eq!(sanitize_area(Some(f64::NAN)), None);
        assert_eq!(sanitize_area(None), None);
    }

    #[test]
    fn negative_values_are_rejected_not_clamped() {
        assert!(check_value(0.0).is_ok());
        assert!(check_value(5.4).is_ok());
        let err = check_value(-3.0).unwrap_err();
        assert_eq!(err.field, "value");
        assert_eq!(err.value, "-3");
        assert!(check_value(f64::INFINITY).is_err());
    }

    #[test]
    fn names_and_ids_must_be_non_empty() {
        assert!(check_name("Mississippi River at Grafton").is_ok());
        assert!(check_name("   ").is_err());
        assert!(check_raw_id("").is_err());
        assert_eq!(check_site_id("  ").unwrap_err().field, "site_id");
        assert!(check_site_id("USGS-1").is_ok());
    }
}
