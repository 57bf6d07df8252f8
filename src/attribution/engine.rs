//! Multi-touch attribution models

use chrono::Duration;
use std::collections::BTreeMap;

use crate::attribution::data_driven::ChannelPopulation;
use crate::attribution::models::{Attribution, AttributionModel};
use crate::models::{ClickEvent, ConversionEvent};

const POSITION_ENDPOINT_SHARE: f64 = 0.4;
const POSITION_MIDDLE_SHARE: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct AttributionEngine {
    half_life: Duration,
    data_driven_min_sessions: usize,
}

impl AttributionEngine {
    pub fn new(half_life: Duration, data_driven_min_sessions: usize) -> Self {
        Self {
            half_life,
            data_driven_min_sessions,
        }
    }

    /// Split one conversion's credit across the channels of its touchpoints.
    ///
    /// `touchpoints` must already be the ordered sequence for the conversion.
    /// An empty sequence yields an empty credit map (direct/unattributed).
    /// `population` is only consulted by the data_driven model; without it
    /// that model degrades to linear.
    pub fn attribute(
        &self,
        conversion: &ConversionEvent,
        touchpoints: &[ClickEvent],
        model: AttributionModel,
        population: Option<&ChannelPopulation>,
    ) -> Attribution {
        if touchpoints.is_empty() {
            return Attribution::default();
        }

        let (weights, degraded_model) = match model {
            AttributionModel::FirstTouch => (first_touch(touchpoints.len()), false),
            AttributionModel::LastTouch => (last_touch(touchpoints.len()), false),
            AttributionModel::Linear => (linear(touchpoints.len()), false),
            AttributionModel::TimeDecay => (self.time_decay(conversion, touchpoints), false),
            AttributionModel::PositionBased => (position_based(touchpoints.len()), false),
            AttributionModel::DataDriven => {
                let channels: Vec<String> = touchpoints.iter().map(ClickEvent::channel).collect();
                let credits = population.and_then(|p| {
                    p.credits(
                        channels.iter().map(String::as_str),
                        self.data_driven_min_sessions,
                    )
                });

                match credits {
                    Some(credits) => {
                        return Attribution {
                            credits,
                            degraded_model: false,
                        }
                    }
                    None => (linear(touchpoints.len()), true),
                }
            }
        };

        let mut credits: BTreeMap<String, f64> = BTreeMap::new();
        for (touchpoint, weight) in touchpoints.iter().zip(weights) {
            if weight > 0.0 {
                *credits.entry(touchpoint.channel()).or_insert(0.0) += weight;
            }
        }

        Attribution {
            credits,
            degraded_model,
        }
    }

    fn time_decay(&self, conversion: &ConversionEvent, touchpoints: &[ClickEvent]) -> Vec<f64> {
        let half_life_secs = self.half_life.num_milliseconds() as f64 / 1000.0;
        let raw: Vec<f64> = touchpoints
            .iter()
            .map(|tp| {
                let age_secs =
                    ((conversion.timestamp - tp.timestamp).num_milliseconds() as f64 / 1000.0)
                        .max(0.0);
                (-age_secs / half_life_secs).exp2()
            })
            .collect();

        let total: f64 = raw.iter().sum();
        if !(total > 0.0) || !total.is_finite() {
            return linear(touchpoints.len());
        }
        raw.into_iter().map(|w| w / total).collect()
    }
}

fn first_touch(n: usize) -> Vec<f64> {
    let mut weights = vec![0.0; n];
    weights[0] = 1.0;
    weights
}

fn last_touch(n: usize) -> Vec<f64> {
    let mut weights = vec![0.0; n];
    weights[n - 1] = 1.0;
    weights
}

fn linear(n: usize) -> Vec<f64> {
    vec![1.0 / n as f64; n]
}

fn position_based(n: usize) -> Vec<f64> {
    match n {
        1 => vec![1.0],
        2 => vec![0.5, 0.5],
        _ => {
            let middle = POSITION_MIDDLE_SHARE / (n - 2) as f64;
            let mut weights = vec![middle; n];
            weights[0] = POSITION_ENDPOINT_SHARE;
            weights[n - 1] = POSITION_ENDPOINT_SHARE;
            weights
        }
    }
}
