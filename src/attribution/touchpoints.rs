//! Touchpoint sequence construction

use chrono::Duration;

use crate::models::{ClickEvent, ConversionEvent};

/// Build the ordered touchpoint sequence for a conversion.
///
/// Keeps clicks inside `[conversion - window, conversion]`. Clicks stamped
/// after the conversion are malformed for this conversion and dropped rather
/// than treated as fatal. The result is sorted ascending by timestamp.
pub fn touchpoint_sequence(
    conversion: &ConversionEvent,
    clicks: impl IntoIterator<Item = ClickEvent>,
    window: Duration,
) -> Vec<ClickEvent> {
    let end = conversion.timestamp;
    let start = end - window;

    let mut sequence: Vec<ClickEvent> = clicks
        .into_iter()
        .filter(|click| click.timestamp >= start && click.timestamp <= end)
        .collect();

    // Stable sort keeps arrival order for identical timestamps
    sequence.sort_by_key(|click| click.timestamp);
    sequence
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn click(session: &str, source: &str, days_before: i64) -> ClickEvent {
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        ClickEvent {
            session_id: session.to_string(),
            short_code: "promo".to_string(),
            timestamp: base - Duration::days(days_before),
            source: source.to_string(),
            medium: "cpc".to_string(),
            campaign: None,
            country: "US".to_string(),
            device: "desktop".to_string(),
        }
    }

    fn conversion() -> ConversionEvent {
        ConversionEvent {
            session_id: "s1".to_string(),
            short_code: "promo".to_string(),
            goal_id: "purchase".to_string(),
            value: 10.0,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_sequence_is_sorted_and_windowed() {
        let clicks = vec![
            click("s1", "b", 3),
            click("s1", "too_old", 40),
            click("s1", "a", 10),
            click("s1", "c", 0),
        ];

        let sequence = touchpoint_sequence(&conversion(), clicks, Duration::days(30));
        let sources: Vec<_> = sequence.iter().map(|c| c.source.as_str()).collect();
        assert_eq!(sources, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_clicks_after_conversion_are_excluded() {
        let clicks = vec![click("s1", "a", 1), click("s1", "future", -2)];
        let sequence = touchpoint_sequence(&conversion(), clicks, Duration::days(30));
        assert_eq!(sequence.len(), 1);
        assert_eq!(sequence[0].source, "a");
    }

    #[test]
    fn test_no_clicks_means_empty_sequence() {
        let sequence = touchpoint_sequence(&conversion(), Vec::new(), Duration::days(30));
        assert!(sequence.is_empty());
    }
}
