//! Data models for attribution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Selectable attribution model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionModel {
    FirstTouch,
    LastTouch,
    Linear,
    TimeDecay,
    PositionBased,
    DataDriven,
}

impl AttributionModel {
    pub const ALL: [AttributionModel; 6] = [
        AttributionModel::FirstTouch,
        AttributionModel::LastTouch,
        AttributionModel::Linear,
        AttributionModel::TimeDecay,
        AttributionModel::PositionBased,
        AttributionModel::DataDriven,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstTouch => "first_touch",
            Self::LastTouch => "last_touch",
            Self::Linear => "linear",
            Self::TimeDecay => "time_decay",
            Self::PositionBased => "position_based",
            Self::DataDriven => "data_driven",
        }
    }
}

impl fmt::Display for AttributionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributionModel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|model| model.as_str() == normalized)
            .ok_or_else(|| {
                AppError::validation(
                    "invalid_attribution_model",
                    format!(
                        "unknown attribution model '{s}'; expected one of first_touch, last_touch, linear, time_decay, position_based, data_driven"
                    ),
                )
            })
    }
}

/// Credit assigned to each channel for a single conversion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attribution {
    /// channel -> credit fraction; sums to 1.0, or is empty for an unattributed conversion
    pub credits: BTreeMap<String, f64>,
    /// data_driven fell back to linear for lack of history
    pub degraded_model: bool,
}

impl Attribution {
    pub fn is_direct(&self) -> bool {
        self.credits.is_empty()
    }

    pub fn total_credit(&self) -> f64 {
        self.credits.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelBreakdown {
    pub channel: String,
    /// Credit-weighted conversion count
    pub conversions: f64,
    pub attributed_value: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportWindow {
    pub days: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Attribution report for one short code, recomputed on demand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionReport {
    pub short_code: String,
    pub model: AttributionModel,
    pub total_conversions: u64,
    pub total_value: f64,
    pub channel_breakdown: Vec<ChannelBreakdown>,
    pub window: ReportWindow,
    /// At least one conversion was attributed with a fallback model
    pub degraded_model: bool,
    /// Some store queries timed out; the report covers a subset of conversions
    pub incomplete: bool,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_parsing() {
        for model in AttributionModel::ALL {
            assert_eq!(model.as_str().parse::<AttributionModel>().unwrap(), model);
        }
        assert_eq!(
            " Time_Decay ".parse::<AttributionModel>().unwrap(),
            AttributionModel::TimeDecay
        );
    }

    #[test]
    fn test_unknown_model_is_rejected() {
        let err = "u_shaped".parse::<AttributionModel>().unwrap_err();
        assert_eq!(err.code(), "invalid_attribution_model");
    }
}
