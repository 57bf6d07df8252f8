use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Channel used for conversions that have no touchpoint in the window
pub const DIRECT_CHANNEL: &str = "direct/none";

/// A recorded click on a short link. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickEvent {
    pub session_id: String,
    pub short_code: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub medium: String,
    pub campaign: Option<String>,
    pub country: String,
    pub device: String,
}

impl ClickEvent {
    /// Attribution channel: `source/medium`
    pub fn channel(&self) -> String {
        format!("{}/{}", self.source, self.medium)
    }
}

/// A recorded conversion. Immutable; triggers attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionEvent {
    pub session_id: String,
    pub short_code: String,
    pub goal_id: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}
