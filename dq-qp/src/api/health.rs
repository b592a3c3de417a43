//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::db::tasks::has_active_task;
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the database is unreachable
    pub status: String,
    pub module: String,
    pub version: String,
    pub git_hash: String,
    pub build_timestamp: String,
    pub build_profile: String,
    pub uptime_seconds: u64,
    /// Whether a batch task is pending or processing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_active: Option<bool>,
    /// Last background failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let (status, task_active) = match has_active_task(&state.db).await {
        Ok(active) => ("ok", Some(active)),
        Err(e) => {
            tracing::warn!(error = %e, "Health check database query failed");
            ("degraded", None)
        }
    };

    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: status.to_string(),
        module: "dq-qp".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("DQ_GIT_HASH").to_string(),
        build_timestamp: env!("DQ_BUILD_TIMESTAMP").to_string(),
        build_profile: env!("DQ_BUILD_PROFILE").to_string(),
        uptime_seconds,
        task_active,
        last_error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
