//! Read-side composition of attribution reports and experiment status
//!
//! Reports are derived from stored events on demand. Complete reports are
//! cached per `(short_code, model, days)` and written through to the store;
//! a report cut short by the query deadline is returned flagged `incomplete`
//! and never cached, so the next read recomputes it.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use moka::future::Cache;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::attribution::{
    touchpoint_sequence, AttributionEngine, AttributionModel, AttributionReport,
    ChannelPopulation, ReportBuilder, ReportWindow,
};
use crate::clock::Clock;
use crate::config::{AttributionConfig, ReportingConfig};
use crate::error::{AppError, AppResult};
use crate::experiments::{
    AbTest, ConfidenceLevel, ExperimentService, SequentialReport, SignificanceReport,
    VariantStats,
};
use crate::models::ClickEvent;
use crate::storage::EventStore;

pub const MIN_REPORT_DAYS: u32 = 1;
pub const MAX_REPORT_DAYS: u32 = 365;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ReportKey {
    short_code: String,
    model: AttributionModel,
    days: u32,
}

/// Everything a dashboard needs about one test
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentStatus {
    pub test: AbTest,
    pub variants: Vec<VariantStats>,
    pub significance: SignificanceReport,
    pub sequential: SequentialReport,
    pub generated_at: DateTime<Utc>,
}

pub struct ReportingFacade {
    store: Arc<dyn EventStore>,
    engine: AttributionEngine,
    experiments: Arc<ExperimentService>,
    clock: Arc<dyn Clock>,
    cache: Cache<ReportKey, Arc<AttributionReport>>,
    /// Bumped on every invalidation; a report computed across a bump is stale
    generations: DashMap<String, u64>,
    query_timeout: Duration,
    attribution_window: ChronoDuration,
    default_model: AttributionModel,
    default_days: u32,
}

impl ReportingFacade {
    pub fn new(
        store: Arc<dyn EventStore>,
        experiments: Arc<ExperimentService>,
        clock: Arc<dyn Clock>,
        attribution: &AttributionConfig,
        reporting: &ReportingConfig,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(reporting.cache_max_entries)
            .time_to_live(Duration::from_secs(reporting.cache_ttl_secs))
            .support_invalidation_closures()
            .build();

        let half_life_ms = (attribution.half_life_days * 86_400_000.0).round() as i64;

        Self {
            store,
            engine: AttributionEngine::new(
                ChronoDuration::milliseconds(half_life_ms),
                attribution.data_driven_min_sessions,
            ),
            experiments,
            clock,
            cache,
            generations: DashMap::new(),
            query_timeout: Duration::from_millis(reporting.query_timeout_ms),
            attribution_window: ChronoDuration::days(attribution.window_days),
            default_model: attribution.default_model,
            default_days: reporting.default_days,
        }
    }

    pub fn default_model(&self) -> AttributionModel {
        self.default_model
    }

    pub fn default_days(&self) -> u32 {
        self.default_days
    }

    async fn bounded<T, F>(&self, what: &str, deadline: Instant, query: F) -> AppResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match time::timeout_at(deadline, query).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(AppError::UpstreamUnavailable(format!("{what} timed out"))),
        }
    }

    /// Attribution report for a link over the last `days` days
    pub async fn attribution_report(
        &self,
        short_code: &str,
        model: AttributionModel,
        days: u32,
    ) -> AppResult<AttributionReport> {
        if !(MIN_REPORT_DAYS..=MAX_REPORT_DAYS).contains(&days) {
            return Err(AppError::validation(
                "invalid_days_parameter",
                format!("days must be between {MIN_REPORT_DAYS} and {MAX_REPORT_DAYS}"),
            ));
        }

        let key = ReportKey {
            short_code: short_code.to_string(),
            model,
            days,
        };
        if let Some(report) = self.cache.get(&key).await {
            debug!(short_code, model = %model, days, "Attribution report cache hit");
            return Ok(report.as_ref().clone());
        }

        let generation = self.generation(short_code);
        let deadline = Instant::now() + self.query_timeout;
        let exists = self
            .bounded("link lookup", deadline, self.store.link_exists(short_code))
            .await?;
        if !exists {
            return Err(AppError::NotFound(format!("short code '{short_code}'")));
        }

        let report = self.compute(short_code, model, days).await?;
        if !report.incomplete {
            self.remember(key, &report, generation).await;
        }
        Ok(report)
    }

    fn generation(&self, short_code: &str) -> u64 {
        self.generations.get(short_code).map_or(0, |g| *g)
    }

    async fn remember(&self, key: ReportKey, report: &AttributionReport, generation: u64) {
        if self.generation(&key.short_code) != generation {
            debug!(short_code = %key.short_code, "Events changed while computing, report not cached");
            return;
        }

        if let Err(e) = self.store.save_report(report).await {
            // The store copy is only a cache; the in-memory one still serves reads
            warn!(short_code = %key.short_code, error = %e, "Failed to persist attribution report");
        }
        self.cache.insert(key.clone(), Arc::new(report.clone())).await;

        // An invalidation between the check and the insert
        if self.generation(&key.short_code) != generation {
            self.cache.invalidate(&key).await;
        }
    }

    async fn compute(
        &self,
        short_code: &str,
        model: AttributionModel,
        days: u32,
    ) -> AppResult<AttributionReport> {
        let now = self.clock.now();
        let start = now - ChronoDuration::days(i64::from(days));
        let lookback = start - self.attribution_window;
        let deadline = Instant::now() + self.query_timeout;

        let conversions = self
            .bounded(
                "conversion query",
                deadline,
                self.store.query_conversions(short_code, start, now),
            )
            .await?;

        let mut builder = ReportBuilder::new(
            short_code,
            model,
            ReportWindow {
                days,
                start,
                end: now,
            },
        );

        let population = if model == AttributionModel::DataDriven {
            match time::timeout_at(deadline, self.store.query_clicks(short_code, lookback, now)).await
            {
                Ok(clicks) => Some(ChannelPopulation::from_events(&clicks?, &conversions)),
                Err(_) => {
                    warn!(short_code, "Click population query timed out");
                    builder.mark_incomplete();
                    None
                }
            }
        } else {
            None
        };

        let mut sessions: HashMap<String, Vec<ClickEvent>> = HashMap::new();
        let mut attributed = 0usize;
        for conversion in &conversions {
            if !sessions.contains_key(&conversion.session_id) {
                let query = self
                    .store
                    .query_touchpoints(&conversion.session_id, lookback, now);
                match time::timeout_at(deadline, query).await {
                    Ok(clicks) => {
                        sessions.insert(conversion.session_id.clone(), clicks?);
                    }
                    Err(_) => {
                        warn!(
                            short_code,
                            attributed,
                            total = conversions.len(),
                            "Touchpoint queries exceeded the deadline, returning partial report"
                        );
                        builder.mark_incomplete();
                        break;
                    }
                }
            }

            let clicks = sessions
                .get(&conversion.session_id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let touchpoints =
                touchpoint_sequence(conversion, clicks.iter().cloned(), self.attribution_window);
            let attribution =
                self.engine
                    .attribute(conversion, &touchpoints, model, population.as_ref());
            builder.add(conversion, &attribution);
            attributed += 1;
        }

        Ok(builder.finish(now))
    }

    /// Forget every cached report of a link
    pub fn invalidate(&self, short_code: &str) {
        *self.generations.entry(short_code.to_string()).or_insert(0) += 1;
        let code = short_code.to_string();
        if let Err(e) = self
            .cache
            .invalidate_entries_if(move |key, _| key.short_code == code)
        {
            warn!(short_code, error = %e, "Failed to invalidate cached reports");
        }
    }

    /// Drop stale reports of a link and recompute its default report.
    /// Run off the request path after a conversion is recorded.
    pub async fn refresh(&self, short_code: &str) -> anyhow::Result<AttributionReport> {
        self.invalidate(short_code);
        let report = self
            .attribution_report(short_code, self.default_model, self.default_days)
            .await?;
        info!(
            short_code,
            model = %report.model,
            conversions = report.total_conversions,
            incomplete = report.incomplete,
            "Attribution report refreshed"
        );
        Ok(report)
    }

    /// Test state, per-variant statistics and both analyses in one payload
    pub async fn experiment_status(
        &self,
        test_id: i64,
        level: ConfidenceLevel,
    ) -> AppResult<ExperimentStatus> {
        let compose = async {
            let test = self.experiments.get(test_id).await?;
            let significance = self.experiments.significance(test_id, level, None).await?;
            let sequential = self.experiments.sequential(test_id, None).await?;
            Ok::<_, AppError>((test, significance, sequential))
        };

        let (test, significance, sequential) = match time::timeout(self.query_timeout, compose).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AppError::UpstreamUnavailable(format!(
                    "status of test {test_id} timed out"
                )))
            }
        };

        let mut variants = vec![significance.control.clone()];
        variants.extend(significance.comparisons.iter().map(|c| c.variant.clone()));

        Ok(ExperimentStatus {
            test,
            variants,
            significance,
            sequential,
            generated_at: self.clock.now(),
        })
    }
}
