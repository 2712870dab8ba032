// =============================================================================
// HTTP Ingress — Axum 0.7
// =============================================================================
//
// Endpoints live under `/api/v1/`. The webhook endpoint authenticates with
// the `X-API-Token` header; health is public. CORS is permissive for
// development.
// =============================================================================

pub mod auth;
pub mod throttle;
pub mod webhook;

use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;

/// Build the ingress router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route(
            "/api/v1/webhooks/tradingview/",
            post(webhook::receive_tradingview),
        )
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}
