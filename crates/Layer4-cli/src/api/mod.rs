//! HTTP API for the berth panel.
//!
//! ```bash
//! berth serve --listen 127.0.0.1:8787
//!
//! curl -X POST http://localhost:8787/api/workspaces \
//!   -H "Content-Type: application/json" \
//!   -d '{"path": "/home/me/app"}'
//! ```

pub mod error;
pub mod handlers;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use berth_task::WorkspaceService;
use handlers::ApiState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

/// Largest accepted request body (base64 archives)
const MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

/// Create the API router
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/projects", get(handlers::list_projects))
        .route("/api/workspaces", post(handlers::create_workspace))
        .route("/api/status", get(handlers::status))
        .route("/api/logs", get(handlers::logs))
        .route("/api/prompt", post(handlers::prompt))
        .route("/api/run", post(handlers::run))
        .route("/api/upload-zip", post(handlers::upload_zip))
        .route(
            "/api/artifacts/jar/download",
            get(handlers::download_artifact),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C, reconciling every `reconcile_every`
pub async fn serve(
    service: WorkspaceService,
    listen: &str,
    reconcile_every: Duration,
) -> anyhow::Result<()> {
    let service = Arc::new(service);

    match service.reconcile().await {
        Ok(report) => info!(
            "Recovered {} workspaces ({} skipped)",
            report.workspaces, report.skipped
        ),
        Err(e) => warn!("Startup reconciliation skipped: {}", e),
    }

    let reconciler = tokio::spawn(reconcile_loop(Arc::clone(&service), reconcile_every));

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("cannot listen on {}", listen))?;
    info!("berth API listening on http://{}", listener.local_addr()?);

    let result = axum::serve(listener, create_router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    reconciler.abort();
    result.context("server error")
}

async fn reconcile_loop(service: ApiState, every: Duration) {
    let every = every.max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match service.reconcile().await {
            Ok(report) => debug!(
                workspaces = report.workspaces,
                recovered = report.recovered,
                "Periodic reconciliation"
            ),
            Err(e) => debug!("Periodic reconciliation skipped: {}", e),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
