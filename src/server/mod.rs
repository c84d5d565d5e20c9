//! HTTP Server
//!
//! Exposes the engine over a small JSON API:
//!
//! - `GET  /health` liveness probe
//! - `POST /v1/enqueue` record and queue a step
//! - `GET  /v1/poll/:workflow_id` list a workflow's steps by id
//! - `GET  /v1/workflow` list a workflow's steps by `Authorization: Bearer <token>`
//! - `GET  /v1/stats` engine counters

pub mod errors;
pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use log::{error, info, warn};
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::execution::Engine;

pub use errors::ApiError;

/// Builds the API router around a shared engine.
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/enqueue", post(handlers::enqueue))
        .route("/v1/poll/:workflow_id", get(handlers::poll))
        .route("/v1/workflow", get(handlers::workflow))
        .route("/v1/stats", get(handlers::stats))
        .with_state(engine)
}

/// Runs the engine worker and the HTTP server until Ctrl-C.
///
/// The engine is closed once the listener stops, which lets the worker
/// finish the step in flight and return.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let engine = Arc::new(Engine::new(config.engine.clone())?);
    info!("Token public key: {}", engine.tokens().public_key_hex());

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    let worker = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run().await })
    };

    let served = axum::serve(listener, router(Arc::clone(&engine)))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    engine.close();
    match worker.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Worker stopped with error: {}", e),
        Err(e) => error!("Worker task panicked: {}", e),
    }

    let stats = engine.stats();
    info!(
        "Shutdown complete: {} enqueued, {} succeeded, {} failed",
        stats.enqueued, stats.succeeded, stats.failed
    );

    served.map_err(Into::into)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
