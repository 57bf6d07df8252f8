//! Per-short-code live counters

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::models::ClickEvent;
use crate::realtime::window::MinuteWindow;

/// Point-in-time view of one link's counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealtimeSnapshot {
    pub short_code: String,
    pub clicks_last_hour: u64,
    pub clicks_today: u64,
    pub active_sessions: u64,
    /// Since process start (or rebuild)
    pub total_clicks: u64,
    pub countries: BTreeMap<String, u64>,
    pub devices: BTreeMap<String, u64>,
    pub last_click_at: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
}

/// In-memory counters for one short code. Ephemeral; the store is the record.
///
/// `clicks_today` resets at local midnight of the configured UTC offset. The
/// reset is applied lazily: a read on a later local day sees zero, and the
/// next click starts the new day's count.
#[derive(Debug, Clone)]
pub struct RealtimeCounterSet {
    short_code: String,
    offset: FixedOffset,
    session_ttl: Duration,
    hour: MinuteWindow,
    day: Option<NaiveDate>,
    today: u64,
    sessions: HashMap<String, DateTime<Utc>>,
    countries: BTreeMap<String, u64>,
    devices: BTreeMap<String, u64>,
    total: u64,
    last_click_at: Option<DateTime<Utc>>,
    /// Set when the sweeper evicts this set; writers must look it up again
    retired: bool,
}

impl RealtimeCounterSet {
    pub fn new(short_code: impl Into<String>, offset: FixedOffset, session_ttl: Duration) -> Self {
        Self {
            short_code: short_code.into(),
            offset,
            session_ttl,
            hour: MinuteWindow::default(),
            day: None,
            today: 0,
            sessions: HashMap::new(),
            countries: BTreeMap::new(),
            devices: BTreeMap::new(),
            total: 0,
            last_click_at: None,
            retired: false,
        }
    }

    pub fn retire(&mut self) {
        self.retired = true;
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    fn local_day(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    /// Apply a click. Event times ahead of `now` are clamped to `now`.
    pub fn record(&mut self, event: &ClickEvent, now: DateTime<Utc>) {
        let at = event.timestamp.min(now);

        self.hour.record(at);

        let day = self.local_day(at);
        match self.day {
            Some(current) if current == day => self.today += 1,
            Some(current) if current > day => {}
            _ => {
                self.day = Some(day);
                self.today = 1;
            }
        }

        let seen = self.sessions.entry(event.session_id.clone()).or_insert(at);
        if *seen < at {
            *seen = at;
        }

        *self.countries.entry(event.country.clone()).or_insert(0) += 1;
        *self.devices.entry(event.device.clone()).or_insert(0) += 1;
        self.total += 1;
        self.last_click_at = Some(self.last_click_at.map_or(at, |last| last.max(at)));
    }

    pub fn clicks_last_hour(&self, now: DateTime<Utc>) -> u64 {
        self.hour.sum(now)
    }

    pub fn clicks_today(&self, now: DateTime<Utc>) -> u64 {
        match self.day {
            Some(day) if day == self.local_day(now) => self.today,
            _ => 0,
        }
    }

    pub fn active_sessions(&self, now: DateTime<Utc>) -> u64 {
        let cutoff = now - self.session_ttl;
        self.sessions.values().filter(|seen| **seen > cutoff).count() as u64
    }

    /// Forget sessions idle past the TTL; returns how many were dropped
    pub fn prune_sessions(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.session_ttl;
        let before = self.sessions.len();
        self.sessions.retain(|_, seen| *seen > cutoff);
        before - self.sessions.len()
    }

    /// No click for at least `idle_for`
    pub fn is_idle(&self, now: DateTime<Utc>, idle_for: Duration) -> bool {
        self.last_click_at
            .map_or(true, |last| now - last >= idle_for)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> RealtimeSnapshot {
        RealtimeSnapshot {
            short_code: self.short_code.clone(),
            clicks_last_hour: self.clicks_last_hour(now),
            clicks_today: self.clicks_today(now),
            active_sessions: self.active_sessions(now),
            total_clicks: self.total,
            countries: self.countries.clone(),
            devices: self.devices.clone(),
            last_click_at: self.last_click_at,
            generated_at: now,
        }
    }
}

/// Zeroed snapshot for a link without clicks since start
pub fn empty_snapshot(short_code: &str, now: DateTime<Utc>) -> RealtimeSnapshot {
    RealtimeSnapshot {
        short_code: short_code.to_string(),
        clicks_last_hour: 0,
        clicks_today: 0,
        active_sessions: 0,
        total_clicks: 0,
        countries: BTreeMap::new(),
        devices: BTreeMap::new(),
        last_click_at: None,
        generated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn click(session: &str, at: DateTime<Utc>, country: &str) -> ClickEvent {
        ClickEvent {
            session_id: session.to_string(),
            short_code: "promo".to_string(),
            timestamp: at,
            source: "google".to_string(),
            medium: "cpc".to_string(),
            campaign: None,
            country: country.to_string(),
            device: "mobile".to_string(),
        }
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_midnight_reset_keeps_hour_window() {
        let mut set = RealtimeCounterSet::new("promo", utc(), Duration::minutes(5));
        let late = Utc.with_ymd_and_hms(2024, 4, 2, 23, 50, 0).unwrap();
        set.record(&click("a", late, "US"), late);
        set.record(&click("b", late, "US"), late);

        let after_midnight = late + Duration::minutes(20);
        assert_eq!(set.clicks_today(late), 2);
        assert_eq!(set.clicks_today(after_midnight), 0);
        assert_eq!(set.clicks_last_hour(after_midnight), 2);

        set.record(&click("c", after_midnight, "FR"), after_midnight);
        assert_eq!(set.clicks_today(after_midnight), 1);
        assert_eq!(set.clicks_last_hour(after_midnight), 3);
        assert_eq!(set.snapshot(after_midnight).total_clicks, 3);
    }

    #[test]
    fn test_midnight_follows_offset() {
        // UTC+02:00: 22:30 UTC is already 00:30 the next local day
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let mut set = RealtimeCounterSet::new("promo", offset, Duration::minutes(5));
        let before = Utc.with_ymd_and_hms(2024, 4, 2, 21, 30, 0).unwrap();
        set.record(&click("a", before, "DE"), before);

        assert_eq!(set.clicks_today(before + Duration::minutes(20)), 1);
        assert_eq!(set.clicks_today(before + Duration::hours(1)), 0);
    }

    #[test]
    fn test_session_presence_ttl() {
        let mut set = RealtimeCounterSet::new("promo", utc(), Duration::minutes(5));
        let t0 = Utc.with_ymd_and_hms(2024, 4, 2, 12, 0, 0).unwrap();
        set.record(&click("a", t0, "US"), t0);
        set.record(&click("b", t0 + Duration::minutes(3), "US"), t0 + Duration::minutes(3));
        set.record(&click("a", t0 + Duration::minutes(1), "US"), t0 + Duration::minutes(3));

        assert_eq!(set.active_sessions(t0 + Duration::minutes(4)), 2);
        assert_eq!(set.active_sessions(t0 + Duration::minutes(7)), 1);
        assert_eq!(set.prune_sessions(t0 + Duration::minutes(7)), 1);
        assert_eq!(set.prune_sessions(t0 + Duration::minutes(9)), 1);
    }

    #[test]
    fn test_tallies_and_idle() {
        let mut set = RealtimeCounterSet::new("promo", utc(), Duration::minutes(5));
        let t0 = Utc.with_ymd_and_hms(2024, 4, 2, 12, 0, 0).unwrap();
        assert!(set.is_idle(t0, Duration::hours(1)));

        set.record(&click("a", t0, "US"), t0);
        set.record(&click("b", t0, "DE"), t0);
        set.record(&click("c", t0, "US"), t0);

        let snapshot = set.snapshot(t0);
        assert_eq!(snapshot.countries.get("US"), Some(&2));
        assert_eq!(snapshot.devices.get("mobile"), Some(&3));
        assert!(!set.is_idle(t0 + Duration::minutes(59), Duration::hours(1)));
        assert!(set.is_idle(t0 + Duration::hours(1), Duration::hours(1)));
    }
}
