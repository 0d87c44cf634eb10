use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub active_connections: usize,
    pub registered_identities: usize,
    pub identities: Vec<String>,
}

impl StatsResponse {
    pub fn collect(state: &AppState) -> Self {
        let identities: Vec<String> = state
            .dispatcher
            .identities()
            .into_iter()
            .map(|identity| identity.to_string())
            .collect();
        Self {
            active_connections: state.connections.active(),
            registered_identities: identities.len(),
            identities,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/debug/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatsResponse::collect(&state))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}
