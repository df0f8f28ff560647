//! Synchronous HTTP path: `POST /trace`.
//!
//! Uses only the command runner — tasks taken over HTTP never touch the
//! dispatch engine or the broker.

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use serde::Deserialize;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::trace::Tracer;

#[derive(Debug, Deserialize)]
struct TraceRequest {
    host: String,
    #[serde(default)]
    params: Vec<String>,
}

#[derive(Clone)]
struct AppState {
    tracer: Tracer,
}

/// Build the HTTP router. Panics anywhere in a handler become a 500
/// instead of tearing down the connection.
pub fn router(tracer: Tracer) -> Router {
    Router::new()
        .route("/trace", post(trace_handler))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { tracer })
}

/// Serve until the listener fails.
pub async fn run(config: Config) -> Result<()> {
    let addr = format!("{}:{}", config.web.host, config.web.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, router(Tracer::from_config(&config)))
        .await
        .context("http server failed")
}

async fn trace_handler(State(state): State<AppState>, body: Bytes) -> (StatusCode, String) {
    let request: TraceRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid request\n".to_string()),
    };

    if request.host.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "invalid request\n".to_string());
    }

    match state.tracer.run(&request.host, &request.params).await {
        Ok(output) => (StatusCode::OK, output),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}
