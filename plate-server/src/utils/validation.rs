//! Input validation helpers
//!
//! Centralized length limits and validation functions for plate reports.

use crate::plates::PlateError;
use crate::utils::AppError;
use shared::plate::PlateReport;

// ── Text length limits ──────────────────────────────────────────────

/// QR identifiers printed on plate slots
pub const MAX_QR_ID_LEN: usize = 128;

/// Collector hostnames (RFC 1035)
pub const MAX_HOSTNAME_LEN: usize = 253;

// ── Validation helpers (HTTP handlers) ──────────────────────────────

/// Validate that a required string is non-empty and within the length limit.
pub fn validate_required_text(value: &str, field: &str, max_len: usize) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(format!("{field} must not be empty")).with_detail("field", field));
    }
    if value.len() > max_len {
        return Err(AppError::validation(format!(
            "{field} is too long ({} chars, max {max_len})",
            value.len()
        ))
        .with_detail("field", field));
    }
    Ok(())
}

/// Validate that an optional string, if present, is within the length limit.
pub fn validate_optional_text(
    value: &Option<String>,
    field: &str,
    max_len: usize,
) -> Result<(), AppError> {
    if let Some(v) = value
        && v.len() > max_len
    {
        return Err(AppError::validation(format!(
            "{field} is too long ({} chars, max {max_len})",
            v.len()
        ))
        .with_detail("field", field));
    }
    Ok(())
}

// ── Validation helpers (plate reports) ──────────────────────────────

/// Validate a report before it reaches the store.
pub fn validate_plate_report(shop_number: i64, report: &PlateReport) -> Result<(), PlateError> {
    if shop_number <= 0 {
        return Err(PlateError::Validation(format!(
            "shopNumber must be positive (got {shop_number})"
        )));
    }
    if report.qr_id.trim().is_empty() {
        return Err(PlateError::Validation("qrId must not be empty".into()));
    }
    if report.qr_id.len() > MAX_QR_ID_LEN {
        return Err(PlateError::Validation(format!(
            "qrId is too long ({} chars, max {MAX_QR_ID_LEN})",
            report.qr_id.len()
        )));
    }
    Ok(())
}
