//! Sliding one-hour click window made of per-minute buckets

use chrono::{DateTime, Utc};

pub const WINDOW_MINUTES: usize = 60;

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    /// Unix minute this bucket currently holds
    minute: i64,
    count: u64,
}

/// Circular buffer of 60 minute buckets.
///
/// A bucket is reused when a click lands on its slot in a later minute, and
/// expired buckets are skipped when summing, so idle links cost nothing.
#[derive(Debug, Clone)]
pub struct MinuteWindow {
    buckets: [Bucket; WINDOW_MINUTES],
}

impl Default for MinuteWindow {
    fn default() -> Self {
        Self {
            buckets: [Bucket::default(); WINDOW_MINUTES],
        }
    }
}

fn unix_minute(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(60)
}

fn slot(minute: i64) -> usize {
    minute.rem_euclid(WINDOW_MINUTES as i64) as usize
}

impl MinuteWindow {
    pub fn record(&mut self, at: DateTime<Utc>) {
        let minute = unix_minute(at);
        let bucket = &mut self.buckets[slot(minute)];

        if bucket.minute == minute {
            bucket.count += 1;
        } else if bucket.minute < minute || bucket.count == 0 {
            *bucket = Bucket { minute, count: 1 };
        }
        // Otherwise the slot already holds a newer minute and this click is
        // more than an hour older than it; it can never be counted again.
    }

    /// Clicks in the 60 minutes ending at `now`
    pub fn sum(&self, now: DateTime<Utc>) -> u64 {
        let current = unix_minute(now);
        self.buckets
            .iter()
            .filter(|b| b.count > 0)
            .filter(|b| {
                let age = current - b.minute;
                (0..WINDOW_MINUTES as i64).contains(&age)
            })
            .map(|b| b.count)
            .sum()
    }

    /// True when no click falls inside the hour ending at `now`
    pub fn is_empty(&self, now: DateTime<Utc>) -> bool {
        self.sum(now) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_counts_within_the_hour() {
        let mut window = MinuteWindow::default();
        window.record(t0());
        window.record(t0() + Duration::seconds(30));
        window.record(t0() + Duration::minutes(30));

        assert_eq!(window.sum(t0() + Duration::minutes(30)), 3);
        assert_eq!(window.sum(t0() + Duration::minutes(59)), 3);
    }

    #[test]
    fn test_expires_after_sixty_minutes() {
        let mut window = MinuteWindow::default();
        window.record(t0());
        window.record(t0() + Duration::minutes(45));

        assert_eq!(window.sum(t0() + Duration::minutes(60)), 1);
        assert_eq!(window.sum(t0() + Duration::minutes(105)), 0);
        assert!(window.is_empty(t0() + Duration::hours(3)));
    }

    #[test]
    fn test_slot_reuse_drops_old_minute() {
        let mut window = MinuteWindow::default();
        window.record(t0());
        window.record(t0() + Duration::minutes(60));

        let now = t0() + Duration::minutes(60);
        assert_eq!(window.sum(now), 1);

        // A straggler from the overwritten minute is ignored
        window.record(t0());
        assert_eq!(window.sum(now), 1);
    }
}
