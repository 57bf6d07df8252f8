//! Aggregation of per-conversion attributions into a report

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::attribution::models::{
    Attribution, AttributionModel, AttributionReport, ChannelBreakdown, ReportWindow,
};
use crate::models::{ConversionEvent, DIRECT_CHANNEL};

#[derive(Debug, Default, Clone, Copy)]
struct ChannelTotals {
    conversions: f64,
    value: f64,
}

/// Accumulates attributed conversions for one report
#[derive(Debug)]
pub struct ReportBuilder {
    short_code: String,
    model: AttributionModel,
    window: ReportWindow,
    total_conversions: u64,
    total_value: f64,
    degraded_model: bool,
    incomplete: bool,
    channels: HashMap<String, ChannelTotals>,
}

impl ReportBuilder {
    pub fn new(short_code: impl Into<String>, model: AttributionModel, window: ReportWindow) -> Self {
        Self {
            short_code: short_code.into(),
            model,
            window,
            total_conversions: 0,
            total_value: 0.0,
            degraded_model: false,
            incomplete: false,
            channels: HashMap::new(),
        }
    }

    /// Fold one conversion and its credit split into the totals
    pub fn add(&mut self, conversion: &ConversionEvent, attribution: &Attribution) {
        self.total_conversions += 1;
        self.total_value += conversion.value;
        self.degraded_model |= attribution.degraded_model;

        if attribution.is_direct() {
            let totals = self.channels.entry(DIRECT_CHANNEL.to_string()).or_default();
            totals.conversions += 1.0;
            totals.value += conversion.value;
            return;
        }

        for (channel, credit) in &attribution.credits {
            let totals = self.channels.entry(channel.clone()).or_default();
            totals.conversions += credit;
            totals.value += credit * conversion.value;
        }
    }

    pub fn mark_incomplete(&mut self) {
        self.incomplete = true;
    }

    pub fn finish(self, generated_at: DateTime<Utc>) -> AttributionReport {
        let total_value = self.total_value;
        let total_conversions = self.total_conversions;

        let mut channel_breakdown: Vec<ChannelBreakdown> = self
            .channels
            .into_iter()
            .map(|(channel, totals)| {
                // Zero-value goals fall back to the share of conversions
                let percentage = if total_value > 0.0 {
                    totals.value / total_value * 100.0
                } else if total_conversions > 0 {
                    totals.conversions / total_conversions as f64 * 100.0
                } else {
                    0.0
                };
                ChannelBreakdown {
                    channel,
                    conversions: totals.conversions,
                    attributed_value: totals.value,
                    percentage,
                }
            })
            .collect();

        channel_breakdown.sort_by(|a, b| {
            b.attributed_value
                .total_cmp(&a.attributed_value)
                .then_with(|| b.conversions.total_cmp(&a.conversions))
                .then_with(|| a.channel.cmp(&b.channel))
        });

        AttributionReport {
            short_code: self.short_code,
            model: self.model,
            total_conversions,
            total_value,
            channel_breakdown,
            window: self.window,
            degraded_model: self.degraded_model,
            incomplete: self.incomplete,
            generated_at,
        }
    }
}
