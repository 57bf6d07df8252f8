use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use linkscope::clock::SystemClock;
use linkscope::config::{Config, LogFormat};
use linkscope::{open_store, App};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Tracing first, so configuration fallbacks are logged
    dotenvy::dotenv().ok();
    let (log_format, _) = LogFormat::from_env();
    init_tracing(log_format);

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Initialize storage
    info!("Initializing database...");
    let store = open_store(&config.database).await?;
    info!("Database initialized successfully");

    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let app = App::new(config, store, Arc::new(SystemClock));

    // Live counters are ephemeral; rebuild them from recent clicks
    if let Err(e) = app.restore_realtime().await {
        warn!(error = %e, "Realtime rebuild failed, starting with empty counters");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweepers = app.spawn_sweepers(shutdown_rx);

    // Start API server
    let listener = tokio::net::TcpListener::bind(&api_addr).await?;
    info!("🚀 API server listening on http://{}", api_addr);

    axum::serve(listener, app.router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    for sweeper in sweepers {
        if let Err(e) = sweeper.await {
            warn!(error = %e, "Sweeper task failed");
        }
    }
    app.shutdown().await;
    info!("Server stopped");

    Ok(())
}
