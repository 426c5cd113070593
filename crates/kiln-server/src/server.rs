//! HTTP server implementation using Axum.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use kiln_core::ConversionPipeline;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::handlers::{handle_convert, handle_health, handle_keep_warm};

/// Application state shared across handlers.
pub struct AppState {
    /// Conversion pipeline (workspace lifecycle, family strategies, engine)
    pub pipeline: ConversionPipeline,
    /// Advisory readiness flag read by the health endpoint. Not a
    /// concurrency guard: concurrent requests are not serialized by it.
    pub ready: AtomicBool,
}

/// Build the router for the conversion service.
pub fn build_router(state: Arc<AppState>, body_limit: usize) -> Router {
    // The browser front-end uploads straight to this service
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/keep_warm", get(handle_keep_warm))
        .route("/health", get(handle_health))
        .route("/convert/:model_type/:format", post(handle_convert))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

/// Start the conversion HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    pipeline: ConversionPipeline,
    host: &str,
    port: u16,
    body_limit: usize,
) -> anyhow::Result<SocketAddr> {
    let state = Arc::new(AppState {
        pipeline,
        ready: AtomicBool::new(true),
    });

    let app = build_router(state, body_limit);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server error");
    });

    Ok(actual_addr)
}
