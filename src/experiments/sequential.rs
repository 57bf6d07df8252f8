//! Wald sequential probability ratio test for early stopping
//!
//! H0: the variant converts at the control rate `p0`.
//! H1: the variant converts at `p0 * (1 + mde)`.
//! Each exposed variant session is a Bernoulli observation that moves the
//! log-likelihood ratio by `ln(p1/p0)` on conversion and by
//! `ln((1-p1)/(1-p0))` otherwise. Decisions are advisory only.

use serde::Serialize;

use crate::experiments::stats::{ArmCounts, StatStatus};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SprtConfig {
    /// Type-I error
    pub alpha: f64,
    /// Type-II error
    pub beta: f64,
    /// Relative minimum detectable effect
    pub mde: f64,
}

impl Default for SprtConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            beta: 0.20,
            mde: 0.10,
        }
    }
}

impl SprtConfig {
    /// `ln((1-β)/α)`
    pub fn upper_boundary(&self) -> f64 {
        ((1.0 - self.beta) / self.alpha).ln()
    }

    /// `ln(β/(1-α))`
    pub fn lower_boundary(&self) -> f64 {
        (self.beta / (1.0 - self.alpha)).ln()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequentialDecision {
    Continue,
    StopVariantWins,
    StopNoEffect,
}

impl SequentialDecision {
    pub fn recommendation(&self) -> &'static str {
        match self {
            Self::Continue => "continue collecting data",
            Self::StopVariantWins => "stop: variant wins",
            Self::StopNoEffect => "stop: no effect, keep control",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SequentialTest {
    config: SprtConfig,
    p0: f64,
    p1: f64,
    step_converted: f64,
    step_missed: f64,
    lambda: f64,
    observations: u64,
    conversions: u64,
}

impl SequentialTest {
    /// Returns `None` when the baseline does not admit a valid H1
    /// (zero or saturated control rate).
    pub fn new(baseline_rate: f64, config: SprtConfig) -> Option<Self> {
        let p0 = baseline_rate;
        let p1 = p0 * (1.0 + config.mde);
        if !(p0 > 0.0 && p0 < 1.0 && p1 > 0.0 && p1 < 1.0) {
            return None;
        }

        Some(Self {
            config,
            p0,
            p1,
            step_converted: (p1 / p0).ln(),
            step_missed: ((1.0 - p1) / (1.0 - p0)).ln(),
            lambda: 0.0,
            observations: 0,
            conversions: 0,
        })
    }

    /// Start from already aggregated variant counts
    pub fn from_counts(baseline_rate: f64, config: SprtConfig, counts: ArmCounts) -> Option<Self> {
        let mut test = Self::new(baseline_rate, config)?;
        test.observe_counts(counts);
        Some(test)
    }

    /// Fold one variant session into the running ratio
    pub fn observe(&mut self, converted: bool) {
        self.observations += 1;
        if converted {
            self.conversions += 1;
            self.lambda += self.step_converted;
        } else {
            self.lambda += self.step_missed;
        }
    }

    /// Fold aggregated counts; equivalent to observing each session in turn
    pub fn observe_counts(&mut self, counts: ArmCounts) {
        let conversions = counts.conversions.min(counts.sessions);
        let missed = counts.sessions - conversions;
        self.observations += counts.sessions;
        self.conversions += conversions;
        self.lambda += conversions as f64 * self.step_converted + missed as f64 * self.step_missed;
    }

    pub fn log_likelihood_ratio(&self) -> f64 {
        self.lambda
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }

    pub fn conversions(&self) -> u64 {
        self.conversions
    }

    pub fn baseline_rate(&self) -> f64 {
        self.p0
    }

    pub fn alternative_rate(&self) -> f64 {
        self.p1
    }

    pub fn decision(&self) -> SequentialDecision {
        if self.lambda >= self.config.upper_boundary() {
            SequentialDecision::StopVariantWins
        } else if self.lambda <= self.config.lower_boundary() {
            SequentialDecision::StopNoEffect
        } else {
            SequentialDecision::Continue
        }
    }

    /// Position of Λ between the boundaries, linearly interpolated to [0, 1].
    ///
    /// This is an approximation, not a posterior probability: 0 at the lower
    /// boundary, 1 at the upper boundary, clamped outside.
    pub fn probability_variant_wins(&self) -> f64 {
        let lower = self.config.lower_boundary();
        let upper = self.config.upper_boundary();
        ((self.lambda - lower) / (upper - lower)).clamp(0.0, 1.0)
    }
}

/// Serializable sequential analysis of one variant against control
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequentialResult {
    pub status: StatStatus,
    pub decision: Option<SequentialDecision>,
    pub recommendation: Option<String>,
    pub log_likelihood_ratio: Option<f64>,
    pub upper_boundary: f64,
    pub lower_boundary: f64,
    /// Linear interpolation of Λ between the boundaries (approximation)
    pub probability_variant_wins: Option<f64>,
    pub baseline_rate: Option<f64>,
    pub alternative_rate: Option<f64>,
    pub sessions_observed: u64,
    pub conversions_observed: u64,
    pub alpha: f64,
    pub beta: f64,
    pub minimum_detectable_effect: f64,
    pub reason: Option<String>,
}

/// Run the SPRT over the variant's counts using the control's observed rate as `p0`
pub fn evaluate(control: ArmCounts, variant: ArmCounts, config: SprtConfig) -> SequentialResult {
    let mut result = SequentialResult {
        status: StatStatus::InsufficientData,
        decision: None,
        recommendation: None,
        log_likelihood_ratio: None,
        upper_boundary: config.upper_boundary(),
        lower_boundary: config.lower_boundary(),
        probability_variant_wins: None,
        baseline_rate: control.rate(),
        alternative_rate: None,
        sessions_observed: variant.sessions,
        conversions_observed: variant.conversions,
        alpha: config.alpha,
        beta: config.beta,
        minimum_detectable_effect: config.mde,
        reason: None,
    };

    let Some(baseline) = control.rate() else {
        result.reason = Some("control has no sessions yet".to_string());
        return result;
    };
    if variant.sessions == 0 {
        result.reason = Some("variant has no sessions yet".to_string());
        return result;
    }
    let Some(test) = SequentialTest::from_counts(baseline, config, variant) else {
        result.reason = Some(format!(
            "control rate {baseline} leaves no room for the hypothesised lift"
        ));
        return result;
    };

    let decision = test.decision();

    result.status = StatStatus::Computed;
    result.decision = Some(decision);
    result.recommendation = Some(decision.recommendation().to_string());
    result.log_likelihood_ratio = Some(test.log_likelihood_ratio());
    result.probability_variant_wins = Some(test.probability_variant_wins());
    result.alternative_rate = Some(test.alternative_rate());
    result.sessions_observed = test.observations();
    result.conversions_observed = test.conversions();
    result
}
