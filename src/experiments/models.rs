//! Data models for A/B tests

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a test: `draft -> active -> {stopped, completed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestState {
    Draft,
    Active,
    /// Manually stopped with a reason
    Stopped,
    /// Reached its end date
    Completed,
}

impl TestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Completed)
    }

    pub fn can_transition_to(&self, next: TestState) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Active) | (Self::Active, Self::Stopped) | (Self::Active, Self::Completed)
        )
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "stopped" => Ok(Self::Stopped),
            "completed" => Ok(Self::Completed),
            other => Err(anyhow::anyhow!("unknown test state '{other}'")),
        }
    }
}

/// One arm of a test, associated with a distinct short link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: i64,
    pub test_id: i64,
    pub name: String,
    pub short_code: String,
    pub is_control: bool,
    pub traffic_split: f64,
    /// Monotonic; never decremented
    pub sessions: u64,
    /// Monotonic; never decremented
    pub conversions: u64,
}

impl Variant {
    /// `None` while no session has been exposed, so an empty arm never
    /// reads as a 0% conversion rate.
    pub fn conversion_rate(&self) -> Option<f64> {
        if self.sessions == 0 {
            return None;
        }
        Some(self.conversions as f64 / self.sessions as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTest {
    pub id: i64,
    pub name: String,
    pub metric_name: String,
    pub state: TestState,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stop_reason: Option<String>,
    pub winner_variant_id: Option<i64>,
    /// Ordered as created; the order defines the cumulative split boundaries
    pub variants: Vec<Variant>,
}

impl AbTest {
    pub fn control(&self) -> Option<&Variant> {
        self.variants.iter().find(|v| v.is_control)
    }

    pub fn variant(&self, variant_id: i64) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == variant_id)
    }

    pub fn traffic_split(&self) -> Vec<f64> {
        self.variants.iter().map(|v| v.traffic_split).collect()
    }

    /// Whether an active test has passed its end date
    pub fn is_due_for_completion(&self, now: DateTime<Utc>) -> bool {
        self.state == TestState::Active && self.end_date.is_some_and(|end| now >= end)
    }
}

/// Request body for creating a test
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAbTestRequest {
    pub name: String,
    #[serde(default = "CreateAbTestRequest::default_metric")]
    pub metric_name: String,
    pub variants: Vec<CreateVariantRequest>,
    /// Optional parallel list; overrides per-variant `traffic_split`
    #[serde(default)]
    pub traffic_split: Option<Vec<f64>>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_immediately: bool,
}

impl CreateAbTestRequest {
    fn default_metric() -> String {
        "conversion_rate".to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateVariantRequest {
    pub name: String,
    pub short_code: String,
    #[serde(default)]
    pub is_control: bool,
    #[serde(default)]
    pub traffic_split: Option<f64>,
}

/// Validated test ready to be persisted
#[derive(Debug, Clone)]
pub struct NewAbTest {
    pub name: String,
    pub metric_name: String,
    pub state: TestState,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub variants: Vec<NewVariant>,
}

#[derive(Debug, Clone)]
pub struct NewVariant {
    pub name: String,
    pub short_code: String,
    pub is_control: bool,
    pub traffic_split: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StopTestRequest {
    pub reason: String,
    #[serde(default)]
    pub winner_variant_id: Option<i64>,
}

/// Per-variant online statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantStats {
    pub variant_id: i64,
    pub name: String,
    pub short_code: String,
    pub is_control: bool,
    pub sessions: u64,
    pub conversions: u64,
    /// `null` when no session has been exposed yet
    pub conversion_rate: Option<f64>,
}

impl From<&Variant> for VariantStats {
    fn from(variant: &Variant) -> Self {
        Self {
            variant_id: variant.id,
            name: variant.name.clone(),
            short_code: variant.short_code.clone(),
            is_control: variant.is_control,
            sessions: variant.sessions,
            conversions: variant.conversions,
            conversion_rate: variant.conversion_rate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        use TestState::*;
        assert!(Draft.can_transition_to(Active));
        assert!(Active.can_transition_to(Stopped));
        assert!(Active.can_transition_to(Completed));

        assert!(!Draft.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Active));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Completed.can_transition_to(Stopped));
        assert!(Stopped.is_terminal() && Completed.is_terminal());
    }

    #[test]
    fn test_state_round_trips_through_storage_form() {
        for state in [TestState::Draft, TestState::Active, TestState::Stopped, TestState::Completed] {
            assert_eq!(state.as_str().parse::<TestState>().unwrap(), state);
        }
        assert!("paused".parse::<TestState>().is_err());
    }

    #[test]
    fn test_zero_session_rate_is_undefined() {
        let variant = Variant {
            id: 1,
            test_id: 1,
            name: "control".into(),
            short_code: "a".into(),
            is_control: true,
            traffic_split: 0.5,
            sessions: 0,
            conversions: 0,
        };
        assert_eq!(variant.conversion_rate(), None);
    }
}
