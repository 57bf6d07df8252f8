//! Counterfactual lift heuristic behind the data_driven model
//!
//! For every channel we compare the conversion rate of sessions that touched
//! the channel against the baseline conversion rate of all sessions seen for
//! the same short code. Positive lifts are normalized into credit fractions.
//! The curve is a documented heuristic; the sample threshold is configurable.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::models::{ClickEvent, ConversionEvent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Sessions in which the channel appeared at least once
    pub sessions: u64,
    /// Of those, sessions that converted
    pub converting_sessions: u64,
}

/// Historical event population for one short code
#[derive(Debug, Clone, Default)]
pub struct ChannelPopulation {
    pub total_sessions: u64,
    pub converting_sessions: u64,
    pub channels: HashMap<String, ChannelStats>,
}

impl ChannelPopulation {
    pub fn from_events(clicks: &[ClickEvent], conversions: &[ConversionEvent]) -> Self {
        let converted: HashSet<&str> = conversions.iter().map(|c| c.session_id.as_str()).collect();

        let mut sessions: HashMap<&str, HashSet<String>> = HashMap::new();
        for click in clicks {
            sessions
                .entry(click.session_id.as_str())
                .or_default()
                .insert(click.channel());
        }
        // Converting sessions with no click still count toward the baseline
        for session in converted.iter().copied() {
            sessions.entry(session).or_default();
        }

        let mut channels: HashMap<String, ChannelStats> = HashMap::new();
        for (session, seen) in &sessions {
            let did_convert = converted.contains(session);
            for channel in seen {
                let stats = channels.entry(channel.clone()).or_default();
                stats.sessions += 1;
                if did_convert {
                    stats.converting_sessions += 1;
                }
            }
        }

        Self {
            total_sessions: sessions.len() as u64,
            converting_sessions: converted.len() as u64,
            channels,
        }
    }

    pub fn baseline_rate(&self) -> Option<f64> {
        if self.total_sessions == 0 {
            return None;
        }
        Some(self.converting_sessions as f64 / self.total_sessions as f64)
    }

    /// Relative lift of a channel's conversion rate over the baseline
    pub fn lift(&self, channel: &str) -> Option<f64> {
        let baseline = self.baseline_rate().filter(|b| *b > 0.0)?;
        let stats = self.channels.get(channel).filter(|s| s.sessions > 0)?;
        let rate = stats.converting_sessions as f64 / stats.sessions as f64;
        Some(rate / baseline - 1.0)
    }

    /// Credit fractions for the given path channels, or `None` when the
    /// population is too small or no channel shows a positive lift.
    pub fn credits<'a>(
        &self,
        path_channels: impl IntoIterator<Item = &'a str>,
        min_sessions: usize,
    ) -> Option<BTreeMap<String, f64>> {
        if self.total_sessions < min_sessions as u64 {
            return None;
        }

        let mut lifts = BTreeMap::new();
        for channel in path_channels {
            if lifts.contains_key(channel) {
                continue;
            }
            let lift = self.lift(channel).unwrap_or(0.0).max(0.0);
            lifts.insert(channel.to_string(), lift);
        }

        let total: f64 = lifts.values().sum();
        if !(total > 0.0) {
            return None;
        }

        Some(
            lifts
                .into_iter()
                .filter(|(_, lift)| *lift > 0.0)
                .map(|(channel, lift)| (channel, lift / total))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn click(session: &str, source: &str) -> ClickEvent {
        ClickEvent {
            session_id: session.to_string(),
            short_code: "promo".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            source: source.to_string(),
            medium: "social".to_string(),
            campaign: None,
            country: "US".to_string(),
            device: "mobile".to_string(),
        }
    }

    fn conversion(session: &str) -> ConversionEvent {
        ConversionEvent {
            session_id: session.to_string(),
            short_code: "promo".to_string(),
            goal_id: "signup".to_string(),
            value: 1.0,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap(),
        }
    }

    /// 100 sessions: twitter sessions convert 50%, facebook sessions 10%.
    fn population() -> ChannelPopulation {
        let mut clicks = Vec::new();
        let mut conversions = Vec::new();
        for i in 0..50 {
            let session = format!("tw-{i}");
            clicks.push(click(&session, "twitter"));
            if i % 2 == 0 {
                conversions.push(conversion(&session));
            }
        }
        for i in 0..50 {
            let session = format!("fb-{i}");
            clicks.push(click(&session, "facebook"));
            if i % 10 == 0 {
                conversions.push(conversion(&session));
            }
        }
        ChannelPopulation::from_events(&clicks, &conversions)
    }

    #[test]
    fn test_population_counts() {
        let pop = population();
        assert_eq!(pop.total_sessions, 100);
        assert_eq!(pop.converting_sessions, 30);
        assert_eq!(pop.channels["twitter/social"].sessions, 50);
        assert_eq!(pop.channels["twitter/social"].converting_sessions, 25);
        assert_eq!(pop.channels["facebook/social"].converting_sessions, 5);
    }

    #[test]
    fn test_positive_lift_takes_all_credit() {
        let pop = population();
        // baseline 0.3; twitter 0.5 -> +66%; facebook 0.1 -> negative
        assert!(pop.lift("twitter/social").unwrap() > 0.6);
        assert!(pop.lift("facebook/social").unwrap() < 0.0);

        let credits = pop
            .credits(["facebook/social", "twitter/social"], 50)
            .unwrap();
        assert_eq!(credits.len(), 1);
        assert!((credits["twitter/social"] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_small_population_has_no_credits() {
        let pop = population();
        assert!(pop.credits(["twitter/social"], 500).is_none());
    }

    #[test]
    fn test_no_positive_lift_has_no_credits() {
        let pop = population();
        assert!(pop.credits(["facebook/social"], 10).is_none());
        assert!(pop.credits(["unseen/email"], 10).is_none());
    }
}
