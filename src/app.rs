//! Service wiring shared by the server binary and the integration tests

use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::{create_api_router, AppState};
use crate::clock::Clock;
use crate::config::{Config, DatabaseBackend, DatabaseConfig};
use crate::cursor::CursorSigner;
use crate::experiments::ExperimentService;
use crate::ingest::EventPipeline;
use crate::realtime::RealtimeAggregator;
use crate::reporting::ReportingFacade;
use crate::storage::{EventStore, PostgresStore, SqliteStore};
use crate::tasks::BackgroundTasks;

/// Connect the configured backend and create its schema
pub async fn open_store(config: &DatabaseConfig) -> Result<Arc<dyn EventStore>> {
    let store: Arc<dyn EventStore> = match config.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.url);
            Arc::new(SqliteStore::new(&config.url, config.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(PostgresStore::new(&config.url, config.max_connections).await?)
        }
    };
    store.init().await?;
    Ok(store)
}

pub struct App {
    pub state: Arc<AppState>,
    pub tasks: Arc<BackgroundTasks>,
    store: Arc<dyn EventStore>,
    config: Config,
}

impl App {
    /// Build every service around one store and clock.
    /// Must be called inside a tokio runtime.
    pub fn new(config: Config, store: Arc<dyn EventStore>, clock: Arc<dyn Clock>) -> Self {
        let cursors = Arc::new(CursorSigner::from_secret(
            config.pagination.cursor_hmac_secret.as_deref(),
        ));
        let tasks = Arc::new(BackgroundTasks::new(
            config.tasks.queue_capacity,
            config.tasks.max_in_flight,
        ));

        let realtime = Arc::new(RealtimeAggregator::new(&config.realtime, Arc::clone(&clock)));
        let experiments = Arc::new(ExperimentService::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            cursors,
            config.experiments.clone(),
        ));
        let reporting = Arc::new(ReportingFacade::new(
            Arc::clone(&store),
            Arc::clone(&experiments),
            Arc::clone(&clock),
            &config.attribution,
            &config.reporting,
        ));
        let pipeline = Arc::new(EventPipeline::new(
            Arc::clone(&store),
            Arc::clone(&realtime),
            Arc::clone(&experiments),
            Arc::clone(&reporting),
            Arc::clone(&tasks),
            clock,
            Duration::from_millis(config.attribution.ack_wait_ms),
        ));

        let state = Arc::new(AppState {
            pipeline,
            reporting,
            experiments,
            realtime,
        });

        Self {
            state,
            tasks,
            store,
            config,
        }
    }

    pub fn router(&self) -> Router {
        create_api_router(Arc::clone(&self.state))
    }

    /// Replay recent clicks into the live counters
    pub async fn restore_realtime(&self) -> Result<usize> {
        self.state
            .realtime
            .rebuild_from_store(self.store.as_ref())
            .await
    }

    /// Realtime and experiment-completion sweepers; both stop on `shutdown`
    pub fn spawn_sweepers(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let realtime_every = Duration::from_secs(self.config.realtime.sweep_interval_secs.max(1));
        let completion_every =
            Duration::from_secs(self.config.experiments.completion_sweep_secs.max(1));

        vec![
            self.state
                .realtime
                .spawn_sweeper(realtime_every, shutdown.clone()),
            self.state
                .experiments
                .spawn_completion_sweeper(completion_every, shutdown),
        ]
    }

    /// Wait for queued background jobs to finish
    pub async fn shutdown(&self) {
        self.tasks.shutdown().await;
    }
}
