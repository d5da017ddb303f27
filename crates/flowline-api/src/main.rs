// Flowline API server

mod catalog_loader;
mod config;
mod error;
mod pool;
mod routes;
mod state;
mod store;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::{Json, Router};
use flowline_core::{CatalogClient, EventDispatcher, InMemoryCatalog, InMemoryStore, PostgresStore, Renderer, RetryController};
use flowline_contracts::*;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{ApiConfig, LogFormat};
use crate::pool::{pool_gate, pool_status, PoolGauge};
use crate::state::AppState;
use crate::store::AnyStore;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// GET /healthz — liveness probe for the `flowline-api` process itself (§6).
async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::events::append_event,
        routes::events::get_event,
        routes::queue::enqueue,
        routes::queue::lease,
        routes::queue::heartbeat,
        routes::queue::complete,
        routes::queue::fail,
        routes::queue::reap_expired,
        routes::queue::size,
        routes::catalog::fetch_resource,
    ),
    components(schemas(
        Event, EventType, EventStatus, NodeType, LoopMeta,
        QueueJob, JobStatus, EnqueueRequest, LeaseRequest, LeaseResponse,
        HeartbeatRequest, FailRequest, QueueSizeResponse, PoolStatus,
        CatalogResourceRequest, CatalogResourceResponse,
        routes::queue::FailOutcomeResponse, routes::queue::QueueSizeParams,
    )),
    tags(
        (name = "events", description = "Event Log"),
        (name = "queue", description = "Work Queue / worker protocol"),
        (name = "catalog", description = "Catalog Client"),
    ),
    info(
        title = "Flowline API",
        version = "0.1.0",
        description = "Event-sourced workflow orchestrator: Event Log, Work Queue, Broker and Catalog surfaces consumed by Flowline workers",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let config = ApiConfig::from_env();

    match config.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "flowline_api=info,tower_http=info".into()),
                )
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "flowline_api=info,tower_http=info".into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    tracing::info!("flowline-api starting...");

    let store = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("failed to connect to DATABASE_URL")?;
            tracing::info!("connected to Postgres store");
            AnyStore::Postgres(PostgresStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; running against the in-memory store (dev mode)");
            AnyStore::Memory(InMemoryStore::new())
        }
    };
    let store = Arc::new(store);

    let catalog = Arc::new(InMemoryCatalog::new());
    if let Some(dir) = &config.catalog_dir {
        match catalog_loader::load_dir(&catalog, dir) {
            Ok(n) => tracing::info!(dir, count = n, "loaded playbooks from FLOWLINE_CATALOG_DIR"),
            Err(e) => tracing::warn!(dir, error = %e, "failed to load FLOWLINE_CATALOG_DIR"),
        }
    }
    let catalog: Arc<dyn CatalogClient> = catalog;

    let renderer = Arc::new(Renderer::new());
    let retry = Arc::new(RetryController::new(renderer.clone()));
    let dispatcher = Arc::new(EventDispatcher::new(
        store.clone(),
        catalog.clone(),
        renderer.clone(),
    ));

    let state = AppState {
        store,
        catalog,
        renderer,
        dispatcher,
        retry,
        config: Arc::new(config.clone()),
    };

    let pool_gauge = Arc::new(PoolGauge::new(config.pool_max));

    // The pool gate only wraps the worker-facing surface (events/queue/catalog);
    // health checks and introspection must stay reachable while saturated.
    let worker_routes = routes::events::routes(state.clone())
        .merge(routes::queue::routes(state.clone()))
        .merge(routes::catalog::routes(state.clone()))
        .layer(axum::middleware::from_fn_with_state(
            pool_gauge.clone(),
            pool_gate,
        ));

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/pool/status",
            get(pool_status).with_state(pool_gauge),
        )
        .merge(worker_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
