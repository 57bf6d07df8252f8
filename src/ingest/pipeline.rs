//! Write path: persist events, then feed the live and derived views

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::AppResult;
use crate::experiments::ExperimentService;
use crate::ingest::{normalize_click, normalize_conversion, ClickPayload, ConversionPayload};
use crate::models::ClickEvent;
use crate::realtime::RealtimeAggregator;
use crate::reporting::ReportingFacade;
use crate::storage::EventStore;
use crate::tasks::BackgroundTasks;

#[derive(Debug, Clone, Serialize)]
pub struct ConversionAck {
    pub conversion_id: i64,
    pub status: &'static str,
    /// False while the attribution refresh is still pending
    pub attribution_calculated: bool,
}

pub struct EventPipeline {
    store: Arc<dyn EventStore>,
    realtime: Arc<RealtimeAggregator>,
    experiments: Arc<ExperimentService>,
    reporting: Arc<ReportingFacade>,
    tasks: Arc<BackgroundTasks>,
    clock: Arc<dyn Clock>,
    ack_wait: Duration,
}

impl EventPipeline {
    pub fn new(
        store: Arc<dyn EventStore>,
        realtime: Arc<RealtimeAggregator>,
        experiments: Arc<ExperimentService>,
        reporting: Arc<ReportingFacade>,
        tasks: Arc<BackgroundTasks>,
        clock: Arc<dyn Clock>,
        ack_wait: Duration,
    ) -> Self {
        Self {
            store,
            realtime,
            experiments,
            reporting,
            tasks,
            clock,
            ack_wait,
        }
    }

    /// Persist a click, then update live counters, notify subscribers and
    /// count experiment exposures
    pub async fn record_click(&self, payload: &ClickPayload) -> AppResult<ClickEvent> {
        let event = normalize_click(payload, self.clock.now())?;
        self.store.save_click(&event).await?;
        self.realtime.record_click(&event);

        // The click is durable; a failed exposure count must not reject it
        if let Err(e) = self.experiments.observe_click(&event).await {
            warn!(error = %e, short_code = %event.short_code, "Failed to count experiment exposure");
        }

        debug!(
            short_code = %event.short_code,
            channel = %event.channel(),
            "Click recorded"
        );
        Ok(event)
    }

    /// Persist a conversion and refresh attribution off the request path.
    ///
    /// The conversion is durable once this returns; a failed refresh only
    /// leaves the cached report stale until the next read recomputes it.
    pub async fn record_conversion(&self, payload: &ConversionPayload) -> AppResult<ConversionAck> {
        let event = normalize_conversion(payload, self.clock.now())?;
        let conversion_id = self.store.save_conversion(&event).await?;

        if let Err(e) = self.experiments.observe_conversion(&event).await {
            warn!(error = %e, short_code = %event.short_code, "Failed to count experiment conversion");
        }

        let (done_tx, done_rx) = oneshot::channel();
        let reporting = Arc::clone(&self.reporting);
        let short_code = event.short_code.clone();
        let queued = self.tasks.dispatch("attribution_refresh", async move {
            reporting.refresh(&short_code).await?;
            let _ = done_tx.send(());
            anyhow::Ok(())
        });

        let attribution_calculated = queued && self.wait_for(done_rx).await;

        info!(
            conversion_id,
            short_code = %event.short_code,
            value = event.value,
            attribution_calculated,
            "Conversion recorded"
        );

        Ok(ConversionAck {
            conversion_id,
            status: "recorded",
            attribution_calculated,
        })
    }

    async fn wait_for(&self, mut done: oneshot::Receiver<()>) -> bool {
        if self.ack_wait.is_zero() {
            return done.try_recv().is_ok();
        }
        matches!(time::timeout(self.ack_wait, done).await, Ok(Ok(())))
    }
}
