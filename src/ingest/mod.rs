//! Normalization of raw click and conversion payloads
//!
//! Everything past this module can assume canonical, validated events.

pub mod pipeline;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::models::{ClickEvent, ConversionEvent};

pub use pipeline::{ConversionAck, EventPipeline};

pub const MAX_SESSION_ID_LEN: usize = 128;
pub const MAX_SHORT_CODE_LEN: usize = 64;
const MAX_LABEL_LEN: usize = 100;
const UNKNOWN_COUNTRY: &str = "XX";

/// Events stamped further ahead than this are rejected
pub fn max_future_skew() -> Duration {
    Duration::minutes(5)
}

/// Event time as sent by clients: RFC 3339 text or unix seconds
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EventTime {
    UnixSeconds(i64),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClickPayload {
    pub session_id: String,
    pub short_code: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub medium: Option<String>,
    #[serde(default)]
    pub campaign: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub event_time: Option<EventTime>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversionPayload {
    pub session_id: String,
    pub short_code: String,
    /// Goal identifier, e.g. `purchase` or `signup`
    pub conversion_type: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub event_time: Option<EventTime>,
}

fn invalid(message: impl Into<String>) -> AppError {
    AppError::validation("invalid_event", message)
}

pub fn normalize_session_id(raw: &str) -> AppResult<String> {
    let session_id = raw.trim();
    if session_id.is_empty() {
        return Err(invalid("session_id is required"));
    }
    if session_id.chars().count() > MAX_SESSION_ID_LEN {
        return Err(invalid(format!(
            "session_id must be at most {MAX_SESSION_ID_LEN} characters"
        )));
    }
    Ok(session_id.to_string())
}

/// Short codes are `[A-Za-z0-9_-]{1,64}`; returns the trimmed code
pub fn validate_short_code(raw: &str) -> AppResult<String> {
    let code = raw.trim();
    let valid = !code.is_empty()
        && code.len() <= MAX_SHORT_CODE_LEN
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(invalid(format!(
            "short_code must be 1-{MAX_SHORT_CODE_LEN} characters of [A-Za-z0-9_-]"
        )));
    }
    Ok(code.to_string())
}

fn normalize_label(raw: Option<&str>, default: &str) -> String {
    let label = raw.map(str::trim).unwrap_or_default();
    if label.is_empty() {
        return default.to_string();
    }
    label.chars().take(MAX_LABEL_LEN).collect::<String>().to_lowercase()
}

fn normalize_country(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(code) if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) => {
            code.to_ascii_uppercase()
        }
        _ => UNKNOWN_COUNTRY.to_string(),
    }
}

fn resolve_time(raw: Option<&EventTime>, now: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
    let at = match raw {
        None => return Ok(now),
        Some(EventTime::UnixSeconds(secs)) => DateTime::from_timestamp(*secs, 0)
            .ok_or_else(|| invalid(format!("event_time {secs} is out of range")))?,
        Some(EventTime::Text(text)) => DateTime::parse_from_rfc3339(text.trim())
            .map_err(|_| invalid("event_time must be RFC 3339 or unix seconds"))?
            .with_timezone(&Utc),
    };

    if at > now + max_future_skew() {
        return Err(invalid("event_time is too far in the future"));
    }
    Ok(at)
}

pub fn normalize_click(payload: &ClickPayload, now: DateTime<Utc>) -> AppResult<ClickEvent> {
    let campaign = payload
        .campaign
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| c.chars().take(MAX_LABEL_LEN).collect());

    Ok(ClickEvent {
        session_id: normalize_session_id(&payload.session_id)?,
        short_code: validate_short_code(&payload.short_code)?,
        timestamp: resolve_time(payload.event_time.as_ref(), now)?,
        source: normalize_label(payload.source.as_deref(), "direct"),
        medium: normalize_label(payload.medium.as_deref(), "none"),
        campaign,
        country: normalize_country(payload.country.as_deref()),
        device: normalize_label(payload.device.as_deref(), "unknown"),
    })
}

pub fn normalize_conversion(
    payload: &ConversionPayload,
    now: DateTime<Utc>,
) -> AppResult<ConversionEvent> {
    let goal_id = payload.conversion_type.trim();
    if goal_id.is_empty() {
        return Err(invalid("conversion_type is required"));
    }
    if !payload.value.is_finite() || payload.value < 0.0 {
        return Err(invalid("value must be a finite, non-negative number"));
    }

    Ok(ConversionEvent {
        session_id: normalize_session_id(&payload.session_id)?,
        short_code: validate_short_code(&payload.short_code)?,
        goal_id: goal_id.chars().take(MAX_LABEL_LEN).collect(),
        value: payload.value,
        timestamp: resolve_time(payload.event_time.as_ref(), now)?,
    })
}
