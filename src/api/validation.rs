//! Input validation for API requests.
//!
//! Validators return `Err(message)` and are collected per field with the
//! `ValidationErrorBuilder` from the `error` module.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use crate::db;

lazy_static! {
    /// Pragmatic email check: one @, no spaces, a dot in the domain
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[^\s@]+@[^\s@]+\.[^\s@]+$"
    ).unwrap();

    /// Phone numbers: optional leading +, digits and common separators
    static ref PHONE_REGEX: Regex = Regex::new(
        r"^\+?[0-9\s().-]+$"
    ).unwrap();

    /// International dial code such as +92
    static ref DIAL_CODE_REGEX: Regex = Regex::new(
        r"^\+\d{1,4}$"
    ).unwrap();

    /// ISO 3166 alpha-2 or alpha-3 country code
    static ref ISO_COUNTRY_REGEX: Regex = Regex::new(
        r"^[A-Z]{2,3}$"
    ).unwrap();
}

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Trim, and treat blank strings as absent
pub fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn validate_required(value: Option<&str>, label: &str, max: usize) -> Result<(), String> {
    match value {
        None => Err(format!("{} is required", label)),
        Some(v) => validate_max_len(v, label, max),
    }
}

pub fn validate_max_len(value: &str, label: &str, max: usize) -> Result<(), String> {
    if value.chars().count() > max {
        return Err(format!("{} is too long (max {} characters)", label, max));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), String> {
    if email.len() > 255 || !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email address".to_string());
    }
    Ok(())
}

pub fn validate_phone(phone: &str) -> Result<(), String> {
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    if phone.len() > 50 || !PHONE_REGEX.is_match(phone) || !(7..=15).contains(&digits) {
        return Err("Invalid phone number".to_string());
    }
    Ok(())
}

pub fn validate_dial_code(code: &str) -> Result<(), String> {
    if !DIAL_CODE_REGEX.is_match(code) {
        return Err("Invalid country dial code".to_string());
    }
    Ok(())
}

/// Accept a dial code (`+44`) or an ISO code (`gb` -> `GB`); anything else is dropped
pub fn normalize_country_code(code: &str) -> Option<String> {
    let code = code.trim();
    if DIAL_CODE_REGEX.is_match(code) {
        return Some(code.to_string());
    }
    let upper = code.to_ascii_uppercase();
    ISO_COUNTRY_REGEX.is_match(&upper).then_some(upper)
}

pub fn validate_estimated_value(value: f64) -> Result<(), String> {
    if !value.is_finite() || value < 0.0 {
        return Err("Estimated value must be a non-negative number".to_string());
    }
    Ok(())
}

pub fn validate_new_password(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }
    Ok(())
}

/// Parse a `from`/`to` filter into the stored timestamp format.
///
/// Accepts RFC 3339 or a bare `YYYY-MM-DD`; a bare date used as an upper
/// bound covers the whole day.
pub fn parse_date_bound(value: &str, end_of_day: bool) -> Result<String, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(db::timestamp(at.with_timezone(&Utc)));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| "Invalid date, expected YYYY-MM-DD or RFC 3339".to_string())?;
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or_else(|| "Invalid date".to_string())?;
    Ok(db::timestamp(date.and_time(time).and_utc()))
}

/// Estimated values arrive as JSON numbers or numeric strings
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NumberOrString {
    Number(f64),
    Text(String),
}

impl NumberOrString {
    pub fn to_f64(&self) -> Result<f64, String> {
        let value = match self {
            NumberOrString::Number(n) => *n,
            NumberOrString::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| "Estimated value must be a number".to_string())?,
        };
        validate_estimated_value(value)?;
        Ok(value)
    }
}
