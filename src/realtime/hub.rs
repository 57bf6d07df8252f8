//! Sharded live counters with subscriber fan-out
//!
//! Each short code owns one `RwLock`ed counter set inside a `DashMap`, so
//! clicks on different links never contend. Subscribers get a bounded queue;
//! a subscriber that cannot keep up is disconnected instead of slowing down
//! `record_click`.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Offset, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::RealtimeConfig;
use crate::models::ClickEvent;
use crate::realtime::counters::{empty_snapshot, RealtimeCounterSet, RealtimeSnapshot};
use crate::storage::EventStore;

/// Message pushed to subscribers, `{"type": ..., "data": ...}` on the wire
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RealtimeMessage {
    ClickEvent(ClickEvent),
    StatsUpdate(RealtimeSnapshot),
}

struct SubscriberSlot {
    id: u64,
    sender: mpsc::Sender<RealtimeMessage>,
}

/// Live subscription; unsubscribes when dropped
pub struct Subscription {
    id: u64,
    short_code: String,
    receiver: mpsc::Receiver<RealtimeMessage>,
    hub: Weak<RealtimeAggregator>,
}

impl Subscription {
    pub fn short_code(&self) -> &str {
        &self.short_code
    }

    /// Next message; `None` once the hub disconnected this subscriber
    pub async fn recv(&mut self) -> Option<RealtimeMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RealtimeMessage> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(&self.short_code, self.id);
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub closed_subscribers: usize,
    pub pruned_sessions: usize,
    pub evicted_sets: usize,
}

pub struct RealtimeAggregator {
    sets: DashMap<String, Arc<RwLock<RealtimeCounterSet>>>,
    subscribers: DashMap<String, Vec<SubscriberSlot>>,
    next_subscriber_id: AtomicU64,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    session_ttl: ChronoDuration,
    idle_evict: ChronoDuration,
    queue_capacity: usize,
}

impl RealtimeAggregator {
    pub fn new(config: &RealtimeConfig, clock: Arc<dyn Clock>) -> Self {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).unwrap_or_else(|| {
            warn!(
                minutes = config.utc_offset_minutes,
                "Invalid realtime UTC offset, using UTC"
            );
            Utc.fix()
        });

        Self {
            sets: DashMap::new(),
            subscribers: DashMap::new(),
            next_subscriber_id: AtomicU64::new(1),
            clock,
            offset,
            session_ttl: ChronoDuration::seconds(config.session_ttl_secs),
            idle_evict: ChronoDuration::seconds(config.idle_evict_secs),
            queue_capacity: config.subscriber_queue.max(1),
        }
    }

    fn counter_set(&self, short_code: &str) -> Arc<RwLock<RealtimeCounterSet>> {
        if let Some(set) = self.sets.get(short_code) {
            return Arc::clone(set.value());
        }
        let set = self.sets.entry(short_code.to_string()).or_insert_with(|| {
            Arc::new(RwLock::new(RealtimeCounterSet::new(
                short_code,
                self.offset,
                self.session_ttl,
            )))
        });
        Arc::clone(set.value())
    }

    /// Apply a click and push `click_event` + `stats_update` to subscribers.
    ///
    /// Fan-out happens under the set's write lock so subscribers of one link
    /// observe clicks in the order they were applied.
    pub fn record_click(&self, event: &ClickEvent) -> RealtimeSnapshot {
        let now = self.clock.now();
        loop {
            let set = self.counter_set(&event.short_code);
            // Retired by the sweeper after the lookup; the map holds a new set
            if let Some(snapshot) = self.apply_click(&set, event, now) {
                return snapshot;
            }
        }
    }

    fn apply_click(
        &self,
        set: &RwLock<RealtimeCounterSet>,
        event: &ClickEvent,
        now: DateTime<Utc>,
    ) -> Option<RealtimeSnapshot> {
        let mut counters = set.write();
        if counters.is_retired() {
            return None;
        }
        counters.record(event, now);
        let snapshot = counters.snapshot(now);

        self.fan_out(
            &event.short_code,
            [
                RealtimeMessage::ClickEvent(event.clone()),
                RealtimeMessage::StatsUpdate(snapshot.clone()),
            ],
        );
        Some(snapshot)
    }

    fn fan_out<const N: usize>(&self, short_code: &str, messages: [RealtimeMessage; N]) {
        let Some(mut slots) = self.subscribers.get_mut(short_code) else {
            return;
        };

        slots.retain(|slot| {
            for message in &messages {
                match slot.sender.try_send(message.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(
                            short_code,
                            subscriber = slot.id,
                            "Subscriber queue overflowed, disconnecting"
                        );
                        return false;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return false,
                }
            }
            true
        });
    }

    pub fn subscribe(self: &Arc<Self>, short_code: &str) -> Subscription {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.queue_capacity);

        self.subscribers
            .entry(short_code.to_string())
            .or_default()
            .push(SubscriberSlot { id, sender });
        debug!(short_code, subscriber = id, "Subscriber registered");

        Subscription {
            id,
            short_code: short_code.to_string(),
            receiver,
            hub: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, short_code: &str, id: u64) {
        if let Some(mut slots) = self.subscribers.get_mut(short_code) {
            slots.retain(|slot| slot.id != id);
        }
        self.subscribers
            .remove_if(short_code, |_, slots| slots.is_empty());
        debug!(short_code, subscriber = id, "Subscriber removed");
    }

    pub fn subscriber_count(&self, short_code: &str) -> usize {
        self.subscribers
            .get(short_code)
            .map_or(0, |slots| slots.len())
    }

    pub fn total_subscribers(&self) -> usize {
        self.subscribers.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn tracked_links(&self) -> usize {
        self.sets.len()
    }

    /// Read-only point query; zeroed for links without clicks since start
    pub fn snapshot(&self, short_code: &str) -> RealtimeSnapshot {
        let now = self.clock.now();
        match self.sets.get(short_code).map(|set| Arc::clone(set.value())) {
            Some(set) => set.read().snapshot(now),
            None => empty_snapshot(short_code, now),
        }
    }

    /// Replay stored clicks without notifying subscribers
    pub fn rebuild(&self, clicks: &[ClickEvent]) {
        let now = self.clock.now();
        for click in clicks {
            loop {
                let set = self.counter_set(&click.short_code);
                let mut counters = set.write();
                if !counters.is_retired() {
                    counters.record(click, now);
                    break;
                }
            }
        }
    }

    /// Earliest instant any counter can still depend on
    pub fn rebuild_horizon(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        let hour_ago = now - ChronoDuration::hours(1);
        let midnight = now
            .with_timezone(&self.offset)
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|naive| naive.and_local_timezone(self.offset).single())
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or(hour_ago);
        midnight.min(hour_ago)
    }

    /// Rebuild every recently active link from the durable store
    pub async fn rebuild_from_store(&self, store: &dyn EventStore) -> Result<usize> {
        let clicks = store.query_recent_clicks(self.rebuild_horizon()).await?;
        self.rebuild(&clicks);
        info!(
            clicks = clicks.len(),
            links = self.tracked_links(),
            "Rebuilt realtime counters from store"
        );
        Ok(clicks.len())
    }

    /// Drop closed subscribers, expired sessions and idle unwatched sets
    pub fn sweep(&self) -> SweepStats {
        let now = self.clock.now();
        let mut stats = SweepStats::default();

        for mut entry in self.subscribers.iter_mut() {
            let before = entry.value().len();
            entry.value_mut().retain(|slot| !slot.sender.is_closed());
            stats.closed_subscribers += before - entry.value().len();
        }
        self.subscribers.retain(|_, slots| !slots.is_empty());

        for entry in self.sets.iter() {
            stats.pruned_sessions += entry.value().write().prune_sessions(now);
        }

        let idle_evict = self.idle_evict;
        let idle: Vec<String> = self
            .sets
            .iter()
            .filter(|entry| entry.value().read().is_idle(now, idle_evict))
            .map(|entry| entry.key().clone())
            .collect();
        for short_code in idle {
            if self.subscribers.contains_key(&short_code) {
                continue;
            }
            // Retire under the set's lock so a concurrent click cannot land in
            // a set that is no longer reachable
            let removed = self.sets.remove_if(&short_code, |_, set| {
                let mut counters = set.write();
                if counters.is_idle(now, idle_evict) {
                    counters.retire();
                    true
                } else {
                    false
                }
            });
            if removed.is_some() {
                stats.evicted_sets += 1;
            }
        }

        stats
    }

    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let stats = hub.sweep();
                        if stats != SweepStats::default() {
                            debug!(
                                closed_subscribers = stats.closed_subscribers,
                                pruned_sessions = stats.pruned_sessions,
                                evicted_sets = stats.evicted_sets,
                                "Realtime sweep finished"
                            );
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Realtime sweeper stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn config(queue: usize) -> RealtimeConfig {
        RealtimeConfig {
            subscriber_queue: queue,
            ..RealtimeConfig::default()
        }
    }

    fn hub(queue: usize) -> (Arc<RealtimeAggregator>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 4, 2, 12, 0, 0).unwrap(),
        ));
        let hub = Arc::new(RealtimeAggregator::new(&config(queue), clock.clone()));
        (hub, clock)
    }

    fn click(code: &str, session: &str, at: DateTime<Utc>) -> ClickEvent {
        ClickEvent {
            session_id: session.to_string(),
            short_code: code.to_string(),
            timestamp: at,
            source: "twitter".to_string(),
            medium: "social".to_string(),
            campaign: None,
            country: "US".to_string(),
            device: "desktop".to_string(),
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_click_then_stats() {
        let (hub, clock) = hub(8);
        let mut subscription = hub.subscribe("promo");

        hub.record_click(&click("promo", "s1", clock.now()));
        hub.record_click(&click("other", "s2", clock.now()));

        match subscription.recv().await.unwrap() {
            RealtimeMessage::ClickEvent(event) => assert_eq!(event.session_id, "s1"),
            other => panic!("unexpected {other:?}"),
        }
        match subscription.recv().await.unwrap() {
            RealtimeMessage::StatsUpdate(stats) => assert_eq!(stats.clicks_last_hour, 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(subscription.try_recv().is_none());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let (hub, _) = hub(8);
        let first = hub.subscribe("promo");
        let second = hub.subscribe("promo");
        assert_eq!(hub.subscriber_count("promo"), 2);

        drop(first);
        assert_eq!(hub.subscriber_count("promo"), 1);
        drop(second);
        assert_eq!(hub.subscriber_count("promo"), 0);
        assert_eq!(hub.total_subscribers(), 0);
    }

    #[test]
    fn test_slow_subscriber_is_disconnected() {
        let (hub, clock) = hub(2);
        let mut slow = hub.subscribe("promo");

        // One click fills the queue with two messages; the next one overflows
        hub.record_click(&click("promo", "s1", clock.now()));
        hub.record_click(&click("promo", "s2", clock.now()));
        assert_eq!(hub.subscriber_count("promo"), 0);

        assert!(slow.try_recv().is_some());
        assert!(slow.try_recv().is_some());
        assert!(slow.try_recv().is_none());
        assert_eq!(hub.snapshot("promo").total_clicks, 2);
    }

    #[test]
    fn test_hour_window_and_midnight_through_hub() {
        let (hub, clock) = hub(8);
        clock.set(Utc.with_ymd_and_hms(2024, 4, 2, 23, 30, 0).unwrap());
        hub.record_click(&click("promo", "s1", clock.now()));

        clock.advance(ChronoDuration::minutes(45));
        let snapshot = hub.snapshot("promo");
        assert_eq!(snapshot.clicks_today, 0);
        assert_eq!(snapshot.clicks_last_hour, 1);

        clock.advance(ChronoDuration::minutes(30));
        assert_eq!(hub.snapshot("promo").clicks_last_hour, 0);
    }

    #[test]
    fn test_sweep_evicts_idle_unwatched_sets() {
        let (hub, clock) = hub(8);
        hub.record_click(&click("idle", "s1", clock.now()));
        hub.record_click(&click("watched", "s2", clock.now()));
        let _watcher = hub.subscribe("watched");

        clock.advance(ChronoDuration::days(2));
        let stats = hub.sweep();
        assert_eq!(stats.evicted_sets, 1);
        assert_eq!(stats.pruned_sessions, 2);
        assert_eq!(hub.tracked_links(), 1);
        assert_eq!(hub.snapshot("idle").total_clicks, 0);
        assert_eq!(hub.snapshot("watched").total_clicks, 1);
    }

    #[test]
    fn test_click_racing_eviction_lands_in_live_set() {
        let (hub, clock) = hub(8);
        hub.record_click(&click("promo", "s1", clock.now()));
        clock.advance(ChronoDuration::days(2));

        // A click that looked the set up just before the sweeper evicted it
        let stale = hub.counter_set("promo");
        assert_eq!(hub.sweep().evicted_sets, 1);
        assert!(stale.read().is_retired());

        let late = click("promo", "s2", clock.now());
        assert!(hub.apply_click(&stale, &late, clock.now()).is_none());

        let snapshot = hub.record_click(&late);
        assert_eq!(snapshot.total_clicks, 1);
        assert_eq!(hub.snapshot("promo").total_clicks, 1);
        assert_eq!(stale.read().snapshot(clock.now()).total_clicks, 1);
    }

    #[test]
    fn test_rebuild_is_silent() {
        let (hub, clock) = hub(8);
        let mut subscription = hub.subscribe("promo");
        let now = clock.now();

        hub.rebuild(&[
            click("promo", "s1", now - ChronoDuration::minutes(90)),
            click("promo", "s2", now - ChronoDuration::minutes(10)),
        ]);

        assert!(subscription.try_recv().is_none());
        let snapshot = hub.snapshot("promo");
        assert_eq!(snapshot.clicks_last_hour, 1);
        assert_eq!(snapshot.clicks_today, 2);
        assert!(hub.rebuild_horizon() <= now - ChronoDuration::hours(1));
    }
}
