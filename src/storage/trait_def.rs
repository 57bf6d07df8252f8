use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::attribution::AttributionReport;
use crate::experiments::{AbTest, NewAbTest, TestState, Variant};
use crate::models::{ClickEvent, ConversionEvent};

/// Position in the test listing, newest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestPageKey {
    pub created_at: DateTime<Utc>,
    pub id: i64,
}

/// Terminal or activating state change of a test
#[derive(Debug, Clone)]
pub struct StateChange {
    pub from: TestState,
    pub to: TestState,
    pub at: DateTime<Utc>,
    pub stop_reason: Option<String>,
    pub winner_variant_id: Option<i64>,
}

/// Durable store of raw events, tests and cached reports
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Initialize the storage (create tables, etc.)
    async fn init(&self) -> Result<()>;

    /// Persist a click and register its short code
    async fn save_click(&self, event: &ClickEvent) -> Result<()>;

    /// Persist a conversion and return its identifier
    async fn save_conversion(&self, event: &ConversionEvent) -> Result<i64>;

    async fn link_exists(&self, short_code: &str) -> Result<bool>;

    /// Clicks of one session within `[from, to]`, oldest first
    async fn query_touchpoints(
        &self,
        session_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ClickEvent>>;

    /// Clicks on one short code within `[from, to]`, oldest first
    async fn query_clicks(
        &self,
        short_code: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ClickEvent>>;

    /// Every click since `from`, oldest first (real-time rebuild)
    async fn query_recent_clicks(&self, from: DateTime<Utc>) -> Result<Vec<ClickEvent>>;

    /// Conversions on one short code within `[from, to]`, oldest first
    async fn query_conversions(
        &self,
        short_code: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ConversionEvent>>;

    /// Store a computed report; a cache, never the source of truth
    async fn save_report(&self, report: &AttributionReport) -> Result<()>;

    /// Create a test together with its variants
    async fn create_test(&self, test: &NewAbTest) -> Result<AbTest>;

    async fn get_test(&self, test_id: i64) -> Result<Option<AbTest>>;

    /// Tests ordered newest first, strictly after `after` when given
    async fn list_tests(&self, after: Option<TestPageKey>, limit: i64) -> Result<Vec<AbTest>>;

    /// Apply a state change only if the test is still in `change.from`.
    /// Returns false when the test moved on concurrently.
    async fn update_test_state(&self, test_id: i64, change: &StateChange) -> Result<bool>;

    /// Active tests whose end date is at or before `now`
    async fn list_due_tests(&self, now: DateTime<Utc>) -> Result<Vec<i64>>;

    /// Active tests with a variant served from `short_code`
    async fn active_tests_for_short_code(&self, short_code: &str) -> Result<Vec<i64>>;

    async fn query_variant_counters(&self, test_id: i64) -> Result<Vec<Variant>>;

    /// Record a session's exposure; counts a session at most once per test.
    /// Returns true when the session was newly counted.
    async fn record_exposure(
        &self,
        test_id: i64,
        variant_id: i64,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Count a conversion for an exposed session at most once.
    /// Returns the credited variant, or `None` if not exposed or already converted.
    async fn record_experiment_conversion(
        &self,
        test_id: i64,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>>;
}
