use chrono::{Datelike, NaiveDate, Utc};

use crate::http::error::ApiError;

pub fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Trim a required text field, rejecting empty input.
pub fn require_trimmed(value: &str, field: &str) -> Result<String, ApiError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(ApiError::bad_request(format!("{field} must not be empty")));
    }
    Ok(v.to_string())
}

/// Trim an optional text field, mapping whitespace-only input to None.
pub fn optional_trimmed<S: AsRef<str>>(value: Option<S>) -> Option<String> {
    value
        .map(|v| v.as_ref().trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validate a calendar date and return it in canonical YYYY-MM-DD form.
pub fn parse_date(value: &str, field: &str) -> Result<String, ApiError> {
    match NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d") {
        Ok(date) => Ok(date.format("%Y-%m-%d").to_string()),
        Err(_) => Err(ApiError::bad_request(format!(
            "{field} must be a YYYY-MM-DD date"
        ))),
    }
}

/// Parse a YYYY-MM month key.
pub fn parse_month(value: &str) -> Result<(i32, u32), ApiError> {
    let invalid = || ApiError::bad_request("month must be formatted YYYY-MM");
    let (y, m) = value.trim().split_once('-').ok_or_else(invalid)?;
    if y.len() != 4 || m.len() != 2 {
        return Err(invalid());
    }
    let year: i32 = y.parse().map_err(|_| invalid())?;
    let month: u32 = m.parse().map_err(|_| invalid())?;
    if !(1..=12).contains(&month) {
        return Err(invalid());
    }
    Ok((year, month))
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(30)
}

/// Escape LIKE wildcards in user-supplied search text; callers pair this
/// with `ESCAPE '\'`.
pub fn like_prefix(q: &str) -> String {
    let escaped = q
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("{escaped}%")
}
