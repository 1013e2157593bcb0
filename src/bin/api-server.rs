//! Botrix API Server
//!
//! HTTP API over the job supervisor: launches external backtest and
//! live-trading processes, polls their status, and persists results.
//! Boot-time recovery clears any live flags left over from a previous
//! run before the server starts accepting requests.

use botrix::config::{self, BotCommand};
use botrix::core::http::start_server;
use botrix::db::PgStore;
use botrix::jobs::recovery::recover_stale_live_flags;
use botrix::jobs::{JobContext, JobRegistry};
use botrix::logging;
use botrix::metrics::Metrics;
use dotenvy::dotenv;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    logging::init_logging();

    let port = config::get_port();
    let env = config::get_environment();
    info!("Starting Botrix API Server");
    info!(environment = %env, "Environment");
    info!(port = port, "HTTP Server: http://0.0.0.0:{}", port);

    // The durable store is required; failing to reach it aborts startup
    let store = Arc::new(PgStore::connect(&config::get_database_url()).await?);

    let recovered = recover_stale_live_flags(store.as_ref()).await?;
    if recovered > 0 {
        info!(count = recovered, "cleared stale live flags at boot");
    }

    let registry = Arc::new(JobRegistry::new(config::get_job_retention()));
    let metrics = Arc::new(Metrics::new()?);
    let ctx = Arc::new(JobContext::new(
        registry,
        store.clone(),
        store.clone(),
        store,
        metrics,
        BotCommand::from_env(),
        config::get_log_buffer_cap(),
    ));

    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(port, ctx).await {
            error!(error = %e, "HTTP server error");
        }
    });

    info!("API server started, waiting for shutdown signal...");
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutting down API server...");
        }
        _ = server_handle => {
            error!("HTTP server stopped");
        }
    }

    Ok(())
}
