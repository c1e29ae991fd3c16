//! HTTP binding for the detector.
//!
//! One detection route plus a health probe. Detection failures are reported
//! in the response body, never in the status line: every `/simple` answer is
//! a `200` whose `detectedLang` field is either a language code or one of the
//! `"unknown"` / `"error"` sentinels.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::Method;
use axum::response::Json;
use axum::routing::{any, get};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::detector::Detector;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub detector: Arc<Detector>,
}

/// Query parameters for `/simple`; both default to empty.
#[derive(Debug, Default, Deserialize)]
struct SimpleParams {
    #[serde(default)]
    query: String,
    #[serde(default)]
    user: String,
}

/// Build the service router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/simple", any(simple_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router on `addr` until ctrl-c.
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on http://{addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

async fn simple_handler(
    State(state): State<AppState>,
    method: Method,
    Query(params): Query<SimpleParams>,
) -> Json<Value> {
    // Parameters are only honoured on GET; any other method detects the
    // empty query, which comes back "unknown".
    let params = if method == Method::GET {
        params
    } else {
        SimpleParams::default()
    };

    let detected = state.detector.detect(&params.query, &params.user);
    tracing::debug!(user = %params.user, detected = %detected, "simple detection");

    Json(json!({ "detectedLang": detected.as_str() }))
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
