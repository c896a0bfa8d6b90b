//! Health check handlers for queue workers.
//!
//! - Liveness probes (`/health`, `/healthz`)
//! - Readiness probes (`/ready`, `/readyz`)
//! - Queue depth per state (`/queue/stats`)
//! - Prometheus metrics (`/metrics`)

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::metrics::{self, QueueMetrics};
use crate::store::QueueProbe;

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    pub probe: Arc<dyn QueueProbe>,
    pub app_name: String,
    pub app_version: String,
}

impl HealthState {
    pub fn new(
        probe: Arc<dyn QueueProbe>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            probe,
            app_name: app_name.into(),
            app_version: app_version.into(),
        }
    }
}

/// Health response for liveness probes.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub name: String,
    pub version: String,
}

/// Liveness probe. Always OK while the process serves requests.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        name: state.app_name,
        version: state.app_version,
    })
}

/// Readiness probe. OK only when the queue store answers.
pub async fn ready_handler(
    State(state): State<HealthState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    match state.probe.ping().await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": { "queue_store": "ok" }
            })),
        )),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": { "queue_store": format!("error: {}", e) }
            })),
        )),
    }
}

/// Job counts per state.
pub async fn queue_stats_handler(
    State(state): State<HealthState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.probe.counts().await {
        Ok(counts) => Ok(Json(json!({
            "queue": state.probe.queue_name(),
            "pending": counts.pending,
            "active": counts.active,
            "completed": counts.completed,
            "failed": counts.failed,
            "total": counts.total(),
        }))),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": format!("Failed to read queue counts: {}", e) })),
        )),
    }
}

/// Prometheus scrape endpoint. Refreshes the depth gauges before rendering.
pub async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    if let Ok(counts) = state.probe.counts().await {
        QueueMetrics::new(state.probe.queue_name(), "-").queue_depth(&counts);
    }

    match metrics::render_metrics() {
        Some(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            output,
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

/// Standard health router for a queue worker process.
pub fn health_router(state: HealthState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/queue/stats", get(queue_stats_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
