//! A/B test lifecycle, assignment and analysis
//!
//! All state lives in the [`EventStore`]; the service holds no per-test
//! memory, so several API workers can share one store safely.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::ExperimentConfig;
use crate::cursor::{page_key, CursorSigner};
use crate::error::{AppError, AppResult};
use crate::experiments::assignment::{assign_index, validate_traffic_split};
use crate::experiments::models::{
    AbTest, CreateAbTestRequest, NewAbTest, NewVariant, StopTestRequest, TestState, Variant,
    VariantStats,
};
use crate::experiments::sequential::{self, SequentialResult, SprtConfig};
use crate::experiments::stats::{two_proportion_z_test, ArmCounts, ConfidenceLevel, SignificanceResult};
use crate::ingest::{normalize_session_id, validate_short_code};
use crate::models::{ClickEvent, ConversionEvent};
use crate::storage::{EventStore, StateChange};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;
const MAX_STOP_REASON: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct Assignment {
    pub test_id: i64,
    pub session_id: String,
    pub variant_id: i64,
    pub variant_name: String,
    pub short_code: String,
    pub is_control: bool,
    /// True when this call counted the session for the first time
    pub exposure_recorded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentConversion {
    pub test_id: i64,
    pub session_id: String,
    pub counted: bool,
    pub variant_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantSignificance {
    pub variant: VariantStats,
    #[serde(flatten)]
    pub result: SignificanceResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignificanceReport {
    pub test_id: i64,
    pub state: TestState,
    pub control: VariantStats,
    pub comparisons: Vec<VariantSignificance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantSequential {
    pub variant: VariantStats,
    #[serde(flatten)]
    pub result: SequentialResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct SequentialReport {
    pub test_id: i64,
    pub state: TestState,
    pub control: VariantStats,
    pub comparisons: Vec<VariantSequential>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestPage {
    pub tests: Vec<AbTest>,
    pub next_cursor: Option<String>,
}

pub struct ExperimentService {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    cursors: Arc<CursorSigner>,
    config: ExperimentConfig,
}

impl ExperimentService {
    pub fn new(
        store: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
        cursors: Arc<CursorSigner>,
        config: ExperimentConfig,
    ) -> Self {
        Self {
            store,
            clock,
            cursors,
            config,
        }
    }

    pub fn default_confidence(&self) -> ConfidenceLevel {
        self.config.default_confidence
    }

    fn sprt_config(&self) -> SprtConfig {
        SprtConfig {
            alpha: self.config.sequential_alpha,
            beta: self.config.sequential_beta,
            mde: self.config.minimum_detectable_effect,
        }
    }

    /// Validate a creation request and persist the test in `draft` or `active`
    pub async fn create(&self, request: CreateAbTestRequest) -> AppResult<AbTest> {
        let new_test = self.validate_create(request)?;
        let test = self.store.create_test(&new_test).await?;

        info!(
            test_id = test.id,
            state = %test.state,
            variants = test.variants.len(),
            "Created A/B test"
        );
        Ok(test)
    }

    fn validate_create(&self, request: CreateAbTestRequest) -> AppResult<NewAbTest> {
        let now = self.clock.now();

        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::validation("invalid_request", "test name is required"));
        }
        let metric_name = request.metric_name.trim().to_string();
        if metric_name.is_empty() {
            return Err(AppError::validation("invalid_request", "metric_name must not be empty"));
        }

        if request.variants.len() < 2 {
            return Err(AppError::validation(
                "invalid_variants",
                "a test needs at least two variants",
            ));
        }

        let mut seen_codes = HashSet::new();
        for variant in &request.variants {
            if variant.name.trim().is_empty() {
                return Err(AppError::validation("invalid_variants", "variant name is required"));
            }
            let code = validate_short_code(&variant.short_code)?;
            if !seen_codes.insert(code) {
                return Err(AppError::validation(
                    "invalid_variants",
                    format!("short code '{}' is used by more than one variant", variant.short_code),
                ));
            }
        }

        let controls = request.variants.iter().filter(|v| v.is_control).count();
        if controls > 1 {
            return Err(AppError::validation(
                "invalid_variants",
                "only one variant may be the control",
            ));
        }

        let split = resolve_split(&request)?;
        validate_traffic_split(&split)?;

        let start_date = request.start_date.unwrap_or(now);
        if let Some(end_date) = request.end_date {
            if end_date <= start_date {
                return Err(AppError::validation(
                    "invalid_request",
                    "end_date must be after start_date",
                ));
            }
        }

        let variants = request
            .variants
            .iter()
            .zip(split)
            .enumerate()
            .map(|(index, (variant, share))| NewVariant {
                name: variant.name.trim().to_string(),
                short_code: variant.short_code.trim().to_string(),
                // Without an explicit control the first variant is the baseline
                is_control: if controls == 0 { index == 0 } else { variant.is_control },
                traffic_split: share,
            })
            .collect();

        Ok(NewAbTest {
            name,
            metric_name,
            state: if request.start_immediately {
                TestState::Active
            } else {
                TestState::Draft
            },
            start_date,
            end_date: request.end_date,
            created_at: now,
            variants,
        })
    }

    /// Fetch a test, completing it first if its end date has passed
    pub async fn get(&self, test_id: i64) -> AppResult<AbTest> {
        let test = self.fetch(test_id).await?;
        let now = self.clock.now();
        if !test.is_due_for_completion(now) {
            return Ok(test);
        }

        self.complete(test_id, now).await?;
        self.fetch(test_id).await
    }

    async fn fetch(&self, test_id: i64) -> AppResult<AbTest> {
        self.store
            .get_test(test_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("A/B test {test_id}")))
    }

    async fn complete(&self, test_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let change = StateChange {
            from: TestState::Active,
            to: TestState::Completed,
            at: now,
            stop_reason: None,
            winner_variant_id: None,
        };
        let applied = self.store.update_test_state(test_id, &change).await?;
        if applied {
            info!(test_id, "A/B test reached its end date and completed");
        }
        Ok(applied)
    }

    async fn transition(&self, test: &AbTest, change: StateChange) -> AppResult<AbTest> {
        if !test.state.can_transition_to(change.to) {
            return Err(invalid_transition(test.state, change.to));
        }

        let applied = self.store.update_test_state(test.id, &change).await?;
        if !applied {
            // Someone else moved the test between our read and the update
            let current = self.fetch(test.id).await?;
            return Err(invalid_transition(current.state, change.to));
        }

        self.fetch(test.id).await
    }

    /// `draft -> active`
    pub async fn start(&self, test_id: i64) -> AppResult<AbTest> {
        let test = self.get(test_id).await?;
        let change = StateChange {
            from: test.state,
            to: TestState::Active,
            at: self.clock.now(),
            stop_reason: None,
            winner_variant_id: None,
        };
        let test = self.transition(&test, change).await?;
        info!(test_id, "Started A/B test");
        Ok(test)
    }

    /// `active -> stopped`, with a mandatory reason and optional winner
    pub async fn stop(&self, test_id: i64, request: StopTestRequest) -> AppResult<AbTest> {
        let reason = request.reason.trim().to_string();
        if reason.is_empty() {
            return Err(AppError::validation(
                "invalid_request",
                "a reason is required to stop a test",
            ));
        }
        if reason.chars().count() > MAX_STOP_REASON {
            return Err(AppError::validation(
                "invalid_request",
                format!("reason must be at most {MAX_STOP_REASON} characters"),
            ));
        }

        let test = self.get(test_id).await?;
        if let Some(winner) = request.winner_variant_id {
            if test.variant(winner).is_none() {
                return Err(AppError::validation(
                    "invalid_request",
                    format!("variant {winner} does not belong to test {test_id}"),
                ));
            }
        }

        let change = StateChange {
            from: test.state,
            to: TestState::Stopped,
            at: self.clock.now(),
            stop_reason: Some(reason),
            winner_variant_id: request.winner_variant_id,
        };
        let test = self.transition(&test, change).await?;
        info!(
            test_id,
            winner = ?test.winner_variant_id,
            "Stopped A/B test"
        );
        Ok(test)
    }

    /// Resolve the session's variant; exposures only count while the test is active
    pub async fn assign(&self, test_id: i64, session_id: &str) -> AppResult<Assignment> {
        let session_id = normalize_session_id(session_id)?;
        let test = self.get(test_id).await?;

        let index = assign_index(test.id, &session_id, &test.traffic_split());
        let Some(variant) = test.variants.get(index) else {
            return Err(AppError::Internal(anyhow::anyhow!(
                "test {test_id} has no variant at index {index}"
            )));
        };

        let exposure_recorded = if test.state == TestState::Active {
            self.store
                .record_exposure(test.id, variant.id, &session_id, self.clock.now())
                .await?
        } else {
            false
        };

        debug!(
            test_id,
            variant_id = variant.id,
            exposure_recorded,
            "Resolved variant assignment"
        );

        Ok(Assignment {
            test_id: test.id,
            session_id,
            variant_id: variant.id,
            variant_name: variant.name.clone(),
            short_code: variant.short_code.clone(),
            is_control: variant.is_control,
            exposure_recorded,
        })
    }

    /// Count a conversion for an exposed session, at most once
    pub async fn convert(&self, test_id: i64, session_id: &str) -> AppResult<ExperimentConversion> {
        let session_id = normalize_session_id(session_id)?;
        let test = self.get(test_id).await?;

        let variant_id = if test.state == TestState::Active {
            self.store
                .record_experiment_conversion(test.id, &session_id, self.clock.now())
                .await?
        } else {
            None
        };

        Ok(ExperimentConversion {
            test_id: test.id,
            session_id,
            counted: variant_id.is_some(),
            variant_id,
        })
    }

    /// Count an ingested click on a variant link as an exposure. The session
    /// only counts when it hashes to the variant whose link it followed.
    pub async fn observe_click(&self, event: &ClickEvent) -> Result<usize> {
        let mut counted = 0;
        for test_id in self.store.active_tests_for_short_code(&event.short_code).await? {
            let test = self.get(test_id).await?;
            if test.state != TestState::Active {
                continue;
            }

            let index = assign_index(test.id, &event.session_id, &test.traffic_split());
            let Some(variant) = test.variants.get(index) else {
                continue;
            };
            if variant.short_code != event.short_code {
                debug!(test_id, short_code = %event.short_code, "Click on a variant the session is not assigned to");
                continue;
            }

            if self
                .store
                .record_exposure(test.id, variant.id, &event.session_id, event.timestamp)
                .await?
            {
                counted += 1;
            }
        }
        Ok(counted)
    }

    /// Count an ingested conversion on a variant link for every active test
    /// the session was exposed to
    pub async fn observe_conversion(&self, event: &ConversionEvent) -> Result<usize> {
        let mut counted = 0;
        for test_id in self.store.active_tests_for_short_code(&event.short_code).await? {
            let test = self.get(test_id).await?;
            if test.state != TestState::Active {
                continue;
            }

            let credited = self
                .store
                .record_experiment_conversion(test.id, &event.session_id, event.timestamp)
                .await?;
            if credited.is_some() {
                counted += 1;
            }
        }
        Ok(counted)
    }

    async fn arms(&self, test_id: i64, variant_id: Option<i64>) -> AppResult<(AbTest, Variant, Vec<Variant>)> {
        let test = self.get(test_id).await?;
        let variants = self.store.query_variant_counters(test.id).await?;

        let control = variants
            .iter()
            .find(|v| v.is_control)
            .cloned()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("test {test_id} has no control")))?;

        let challengers: Vec<Variant> = match variant_id {
            Some(id) => {
                let variant = variants
                    .iter()
                    .find(|v| v.id == id && !v.is_control)
                    .cloned()
                    .ok_or_else(|| {
                        AppError::NotFound(format!("challenger variant {id} of test {test_id}"))
                    })?;
                vec![variant]
            }
            None => variants.into_iter().filter(|v| !v.is_control).collect(),
        };

        Ok((test, control, challengers))
    }

    /// z-test of every challenger (or one) against the control
    pub async fn significance(
        &self,
        test_id: i64,
        level: ConfidenceLevel,
        variant_id: Option<i64>,
    ) -> AppResult<SignificanceReport> {
        let (test, control, challengers) = self.arms(test_id, variant_id).await?;
        let control_counts = ArmCounts::from(&control);

        let comparisons = challengers
            .iter()
            .map(|variant| VariantSignificance {
                variant: VariantStats::from(variant),
                result: two_proportion_z_test(
                    control_counts,
                    ArmCounts::from(variant),
                    level,
                    self.config.minimum_detectable_effect,
                ),
            })
            .collect();

        Ok(SignificanceReport {
            test_id: test.id,
            state: test.state,
            control: VariantStats::from(&control),
            comparisons,
        })
    }

    /// SPRT decision of every challenger (or one) against the control
    pub async fn sequential(&self, test_id: i64, variant_id: Option<i64>) -> AppResult<SequentialReport> {
        let (test, control, challengers) = self.arms(test_id, variant_id).await?;
        let control_counts = ArmCounts::from(&control);
        let config = self.sprt_config();

        let comparisons = challengers
            .iter()
            .map(|variant| VariantSequential {
                variant: VariantStats::from(variant),
                result: sequential::evaluate(control_counts, ArmCounts::from(variant), config),
            })
            .collect();

        Ok(SequentialReport {
            test_id: test.id,
            state: test.state,
            control: VariantStats::from(&control),
            comparisons,
        })
    }

    /// Newest-first page of tests with an opaque continuation cursor
    pub async fn list(&self, limit: Option<i64>, cursor: Option<&str>) -> AppResult<TestPage> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(AppError::validation(
                "invalid_request",
                format!("limit must be between 1 and {MAX_PAGE_SIZE}"),
            ));
        }

        let after = match cursor {
            Some(cursor) => Some(self.cursors.verify(cursor).map_err(|e| {
                warn!(error = %e, "Rejected pagination cursor");
                AppError::validation("invalid_request", "invalid cursor")
            })?),
            None => None,
        };

        // One extra row tells us whether another page exists
        let mut tests = self.store.list_tests(after, limit + 1).await?;
        let has_more = tests.len() as i64 > limit;
        tests.truncate(limit as usize);

        let next_cursor = match (has_more, tests.last()) {
            (true, Some(last)) => Some(self.cursors.sign(&page_key(last.created_at, last.id))?),
            _ => None,
        };

        Ok(TestPage { tests, next_cursor })
    }

    /// Complete every active test past its end date; returns how many moved
    pub async fn complete_due_tests(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut completed = 0;
        for test_id in self.store.list_due_tests(now).await? {
            if self.complete(test_id, now).await? {
                completed += 1;
            }
        }
        Ok(completed)
    }

    pub fn spawn_completion_sweeper(
        self: &Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match service.complete_due_tests().await {
                            Ok(0) => {}
                            Ok(n) => info!(completed = n, "Completion sweep finished"),
                            Err(e) => error!(error = %e, "Completion sweep failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Completion sweeper stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

fn invalid_transition(from: TestState, to: TestState) -> AppError {
    AppError::validation(
        "invalid_state_transition",
        format!("cannot move a test from {from} to {to}"),
    )
}

/// Per-test split list wins; otherwise every variant must carry a share,
/// or none does and traffic is divided equally.
fn resolve_split(request: &CreateAbTestRequest) -> AppResult<Vec<f64>> {
    if let Some(split) = &request.traffic_split {
        if split.len() != request.variants.len() {
            return Err(AppError::validation(
                "invalid_traffic_split",
                format!(
                    "traffic_split has {} entries for {} variants",
                    split.len(),
                    request.variants.len()
                ),
            ));
        }
        return Ok(split.clone());
    }

    let shares: Vec<Option<f64>> = request.variants.iter().map(|v| v.traffic_split).collect();
    if shares.iter().all(Option::is_none) {
        let equal = 1.0 / shares.len() as f64;
        return Ok(vec![equal; shares.len()]);
    }

    shares
        .into_iter()
        .map(|share| {
            share.ok_or_else(|| {
                AppError::validation(
                    "invalid_traffic_split",
                    "either every variant or none must set traffic_split",
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::experiments::models::CreateVariantRequest;
    use crate::storage::SqliteStore;
    use chrono::TimeZone;

    async fn service() -> (ExperimentService, Arc<ManualClock>) {
        let store = SqliteStore::new("sqlite::memory:", 1).await.unwrap();
        store.init().await.unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        let service = ExperimentService::new(
            Arc::new(store),
            clock.clone(),
            Arc::new(CursorSigner::new(b"test")),
            ExperimentConfig::default(),
        );
        (service, clock)
    }

    fn request(split: Option<Vec<f64>>) -> CreateAbTestRequest {
        CreateAbTestRequest {
            name: "Landing copy".to_string(),
            metric_name: "conversion_rate".to_string(),
            variants: vec![
                CreateVariantRequest {
                    name: "control".to_string(),
                    short_code: "promo-a".to_string(),
                    is_control: true,
                    traffic_split: None,
                },
                CreateVariantRequest {
                    name: "bold".to_string(),
                    short_code: "promo-b".to_string(),
                    is_control: false,
                    traffic_split: None,
                },
            ],
            traffic_split: split,
            start_date: None,
            end_date: None,
            start_immediately: true,
        }
    }

    #[tokio::test]
    async fn test_create_rejects_bad_split() {
        let (service, _) = service().await;
        let err = service.create(request(Some(vec![0.5, 0.4]))).await.unwrap_err();
        assert_eq!(err.code(), "invalid_traffic_split");

        let test = service.create(request(Some(vec![0.5, 0.5]))).await.unwrap();
        assert_eq!(test.state, TestState::Active);
        assert_eq!(test.variants.len(), 2);
    }

    #[tokio::test]
    async fn test_equal_split_and_default_control() {
        let (service, _) = service().await;
        let mut req = request(None);
        req.variants[0].is_control = false;
        req.start_immediately = false;

        let test = service.create(req).await.unwrap();
        assert_eq!(test.state, TestState::Draft);
        assert_eq!(test.traffic_split(), vec![0.5, 0.5]);
        assert!(test.variants[0].is_control);
    }

    #[tokio::test]
    async fn test_assignment_counts_once() {
        let (service, _) = service().await;
        let test = service.create(request(None)).await.unwrap();

        let first = service.assign(test.id, "visitor-1").await.unwrap();
        let again = service.assign(test.id, "visitor-1").await.unwrap();
        assert_eq!(first.variant_id, again.variant_id);
        assert!(first.exposure_recorded);
        assert!(!again.exposure_recorded);

        let conversion = service.convert(test.id, "visitor-1").await.unwrap();
        assert!(conversion.counted);
        assert_eq!(conversion.variant_id, Some(first.variant_id));
        assert!(!service.convert(test.id, "visitor-1").await.unwrap().counted);
        assert!(!service.convert(test.id, "never-seen").await.unwrap().counted);

        let test = service.get(test.id).await.unwrap();
        let variant = test.variant(first.variant_id).unwrap();
        assert_eq!((variant.sessions, variant.conversions), (1, 1));
    }

    #[tokio::test]
    async fn test_draft_assignment_is_not_counted() {
        let (service, _) = service().await;
        let mut req = request(None);
        req.start_immediately = false;
        let test = service.create(req).await.unwrap();

        let assignment = service.assign(test.id, "visitor-1").await.unwrap();
        assert!(!assignment.exposure_recorded);

        service.start(test.id).await.unwrap();
        let assignment = service.assign(test.id, "visitor-1").await.unwrap();
        assert!(assignment.exposure_recorded);
    }

    #[tokio::test]
    async fn test_stop_rules() {
        let (service, _) = service().await;
        let test = service.create(request(None)).await.unwrap();

        let err = service
            .stop(test.id, StopTestRequest { reason: "  ".to_string(), winner_variant_id: None })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_request");

        let err = service
            .stop(test.id, StopTestRequest { reason: "done".to_string(), winner_variant_id: Some(9999) })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_request");

        let winner = test.variants[1].id;
        let stopped = service
            .stop(test.id, StopTestRequest { reason: "clear winner".to_string(), winner_variant_id: Some(winner) })
            .await
            .unwrap();
        assert_eq!(stopped.state, TestState::Stopped);
        assert_eq!(stopped.winner_variant_id, Some(winner));
        assert_eq!(stopped.stop_reason.as_deref(), Some("clear winner"));

        let err = service
            .stop(test.id, StopTestRequest { reason: "again".to_string(), winner_variant_id: None })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_state_transition");
        assert_eq!(service.start(test.id).await.unwrap_err().code(), "invalid_state_transition");
    }

    #[tokio::test]
    async fn test_auto_completion_on_read_and_sweep() {
        let (service, clock) = service().await;
        let mut req = request(None);
        req.end_date = Some(clock.now() + chrono::Duration::days(7));
        let read_test = service.create(req.clone()).await.unwrap();
        let swept_test = service.create(req).await.unwrap();

        clock.advance(chrono::Duration::days(8));
        let read = service.get(read_test.id).await.unwrap();
        assert_eq!(read.state, TestState::Completed);

        assert_eq!(service.complete_due_tests().await.unwrap(), 1);
        let swept = service.get(swept_test.id).await.unwrap();
        assert_eq!(swept.state, TestState::Completed);
    }

    #[tokio::test]
    async fn test_zero_session_arms_are_insufficient() {
        let (service, _) = service().await;
        let test = service.create(request(None)).await.unwrap();

        let report = service.significance(test.id, ConfidenceLevel::P95, None).await.unwrap();
        assert_eq!(report.comparisons.len(), 1);
        assert_eq!(report.comparisons[0].result.status, crate::experiments::StatStatus::InsufficientData);
        assert_eq!(report.control.conversion_rate, None);

        let report = service.sequential(test.id, None).await.unwrap();
        assert!(report.comparisons[0].result.decision.is_none());

        let control_id = test.control().unwrap().id;
        let err = service.sequential(test.id, Some(control_id)).await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn test_list_pages_through_cursor() {
        let (service, clock) = service().await;
        for _ in 0..5 {
            service.create(request(None)).await.unwrap();
            clock.advance(chrono::Duration::minutes(1));
        }

        let first = service.list(Some(2), None).await.unwrap();
        assert_eq!(first.tests.len(), 2);
        let cursor = first.next_cursor.clone().unwrap();

        let second = service.list(Some(2), Some(&cursor)).await.unwrap();
        assert_eq!(second.tests.len(), 2);
        assert!(second.tests[0].created_at < first.tests[1].created_at);

        let third = service.list(Some(2), second.next_cursor.as_deref()).await.unwrap();
        assert_eq!(third.tests.len(), 1);
        assert!(third.next_cursor.is_none());

        assert_eq!(service.list(Some(2), Some("bogus.cursor")).await.unwrap_err().code(), "invalid_request");
        assert_eq!(service.list(Some(0), None).await.unwrap_err().code(), "invalid_request");
    }
}
