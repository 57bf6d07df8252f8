pub mod counters;
pub mod hub;
pub mod window;

pub use counters::{RealtimeCounterSet, RealtimeSnapshot};
pub use hub::{RealtimeAggregator, RealtimeMessage, Subscription, SweepStats};
pub use window::MinuteWindow;
