// Flowline worker process
mod aggregator;
mod client;
mod config;
mod error;
mod executors;
mod gate;
mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use flowline_core::Renderer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::client::ServerClient;
use crate::config::WorkerConfig;
use crate::gate::AdaptiveGate;
use crate::worker::WorkerLoop;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env();
    tracing::info!(
        worker_id = %config.worker_id,
        server_url = %config.server_url,
        concurrency = config.concurrency,
        "flowline-worker starting"
    );

    let gate = Arc::new(AdaptiveGate::new(config.gate));
    let probe_http = reqwest::Client::new();
    tokio::spawn(gate.clone().run_probe(probe_http, config.server_url.clone()));

    let client = Arc::new(ServerClient::new(config.server_url.clone(), gate.clone()));
    let renderer = Arc::new(Renderer::new());

    let pg_pool = match std::env::var("FLOWLINE_TASK_DATABASE_URL") {
        Ok(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(&url)
                .await
                .context("failed to connect to FLOWLINE_TASK_DATABASE_URL")?;
            tracing::info!("connected postgres executor pool");
            Some(Arc::new(pool))
        }
        Err(_) => {
            tracing::warn!("FLOWLINE_TASK_DATABASE_URL not set; postgres steps will fail to dispatch");
            None
        }
    };

    let registry = Arc::new(executors::build_registry(pg_pool));

    let worker_loop = Arc::new(WorkerLoop::new(client, registry, renderer, config));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let run_handle = tokio::spawn(worker_loop.run(shutdown_rx));

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown signal received");
    gate.stop();
    let _ = shutdown_tx.send(true);
    let _ = run_handle.await;

    Ok(())
}
