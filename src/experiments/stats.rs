//! Two-proportion significance testing and power analysis

use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;
use crate::experiments::models::Variant;

/// `[z_{α/2} @ 90%, @ 95%, @ 99%, z_β @ 80% power]`, generated by build.rs
const NORMAL_QUANTILES: [f64; 4] = include!(concat!(env!("OUT_DIR"), "/normal_quantiles.in"));

/// Supported two-sided confidence levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ConfidenceLevel {
    P90,
    P95,
    P99,
}

impl ConfidenceLevel {
    pub fn percent(&self) -> u8 {
        match self {
            Self::P90 => 90,
            Self::P95 => 95,
            Self::P99 => 99,
        }
    }

    pub fn level(&self) -> f64 {
        f64::from(self.percent()) / 100.0
    }

    /// Type-I error rate, `1 - level`
    pub fn alpha(&self) -> f64 {
        1.0 - self.level()
    }

    /// Two-sided critical value `z_{α/2}`
    pub fn z_critical(&self) -> f64 {
        match self {
            Self::P90 => NORMAL_QUANTILES[0],
            Self::P95 => NORMAL_QUANTILES[1],
            Self::P99 => NORMAL_QUANTILES[2],
        }
    }
}

/// Quantile of the standard normal for 80% power
pub fn z_power() -> f64 {
    NORMAL_QUANTILES[3]
}

impl TryFrom<u8> for ConfidenceLevel {
    type Error = AppError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            90 => Ok(Self::P90),
            95 => Ok(Self::P95),
            99 => Ok(Self::P99),
            other => Err(invalid_confidence(&other.to_string())),
        }
    }
}

impl From<ConfidenceLevel> for u8 {
    fn from(level: ConfidenceLevel) -> Self {
        level.percent()
    }
}

impl FromStr for ConfidenceLevel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u8>()
            .map_err(|_| invalid_confidence(s))
            .and_then(ConfidenceLevel::try_from)
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.percent())
    }
}

fn invalid_confidence(raw: &str) -> AppError {
    AppError::validation(
        "invalid_confidence_parameter",
        format!("confidence must be one of 90, 95, 99; got '{raw}'"),
    )
}

/// Standard normal CDF
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// Exposure and conversion counts of one arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArmCounts {
    pub sessions: u64,
    pub conversions: u64,
}

impl ArmCounts {
    pub fn new(sessions: u64, conversions: u64) -> Self {
        Self {
            sessions,
            conversions,
        }
    }

    pub fn rate(&self) -> Option<f64> {
        if self.sessions == 0 {
            return None;
        }
        Some(self.conversions as f64 / self.sessions as f64)
    }
}

impl From<&Variant> for ArmCounts {
    fn from(variant: &Variant) -> Self {
        Self::new(variant.sessions, variant.conversions)
    }
}

/// Whether a statistic could be computed from the current sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatStatus {
    Computed,
    InsufficientData,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Outcome of a control-vs-variant z-test. Every field is always present;
/// values that cannot be computed serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignificanceResult {
    pub status: StatStatus,
    pub confidence_level: ConfidenceLevel,
    pub control_rate: Option<f64>,
    pub variant_rate: Option<f64>,
    pub z_score: Option<f64>,
    pub p_value: Option<f64>,
    pub is_significant: Option<bool>,
    /// Absolute difference `p_v - p_c`
    pub effect_size: Option<f64>,
    pub improvement_percentage: Option<f64>,
    pub confidence_interval: Option<ConfidenceInterval>,
    /// Smallest absolute difference detectable at 80% power with the current samples
    pub minimum_detectable_effect: Option<f64>,
    /// Sessions per arm needed to detect the configured relative lift at 80% power
    pub sample_size_recommendation: Option<u64>,
    pub adequate_sample: Option<bool>,
    pub reason: Option<String>,
}

impl SignificanceResult {
    fn insufficient(
        level: ConfidenceLevel,
        control: ArmCounts,
        variant: ArmCounts,
        sample_size_recommendation: Option<u64>,
        reason: &str,
    ) -> Self {
        Self {
            status: StatStatus::InsufficientData,
            confidence_level: level,
            control_rate: control.rate(),
            variant_rate: variant.rate(),
            z_score: None,
            p_value: None,
            is_significant: None,
            effect_size: None,
            improvement_percentage: None,
            confidence_interval: None,
            minimum_detectable_effect: None,
            sample_size_recommendation,
            adequate_sample: None,
            reason: Some(reason.to_string()),
        }
    }
}

/// Sessions per arm needed to detect a relative lift `mde` over `baseline`
/// at the given confidence and 80% power.
pub fn required_sample_size(baseline: f64, mde: f64, level: ConfidenceLevel) -> Option<u64> {
    let p1 = baseline;
    let p2 = baseline * (1.0 + mde);
    if !(p1 > 0.0 && p1 < 1.0 && p2 > 0.0 && p2 < 1.0) || p1 == p2 {
        return None;
    }

    let p_bar = (p1 + p2) / 2.0;
    let numerator = level.z_critical() * (2.0 * p_bar * (1.0 - p_bar)).sqrt()
        + z_power() * (p1 * (1.0 - p1) + p2 * (1.0 - p2)).sqrt();
    let n = numerator.powi(2) / (p2 - p1).powi(2);
    Some(n.ceil() as u64)
}

/// Two-proportion z-test of `variant` against `control`
pub fn two_proportion_z_test(
    control: ArmCounts,
    variant: ArmCounts,
    level: ConfidenceLevel,
    mde: f64,
) -> SignificanceResult {
    let recommendation = control
        .rate()
        .and_then(|baseline| required_sample_size(baseline, mde, level));

    let (Some(p_c), Some(p_v)) = (control.rate(), variant.rate()) else {
        return SignificanceResult::insufficient(
            level,
            control,
            variant,
            recommendation,
            "an arm has no sessions yet",
        );
    };

    let n_c = control.sessions as f64;
    let n_v = variant.sessions as f64;
    let p_pool = (control.conversions + variant.conversions) as f64 / (n_c + n_v);
    let se = (p_pool * (1.0 - p_pool) * (1.0 / n_c + 1.0 / n_v)).sqrt();

    if !(se > 0.0) {
        return SignificanceResult::insufficient(
            level,
            control,
            variant,
            recommendation,
            "standard error is zero",
        );
    }

    let effect = p_v - p_c;
    let z = effect / se;
    let p_value = 2.0 * (1.0 - normal_cdf(z.abs()));
    let margin = level.z_critical() * se;
    let mde_absolute = (level.z_critical() + z_power()) * se;

    SignificanceResult {
        status: StatStatus::Computed,
        confidence_level: level,
        control_rate: Some(p_c),
        variant_rate: Some(p_v),
        z_score: Some(z),
        p_value: Some(p_value),
        is_significant: Some(p_value < level.alpha()),
        effect_size: Some(effect),
        improvement_percentage: (p_c > 0.0).then(|| effect / p_c * 100.0),
        confidence_interval: Some(ConfidenceInterval {
            lower: effect - margin,
            upper: effect + margin,
        }),
        minimum_detectable_effect: Some(mde_absolute),
        sample_size_recommendation: recommendation,
        adequate_sample: recommendation
            .map(|needed| control.sessions.min(variant.sessions) >= needed),
        reason: None,
    }
}
