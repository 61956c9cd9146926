//! Health check endpoint
//!
//! Uptime plus job and worker counts for monitoring

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::config::MODULE_NAME;
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok", or "busy" when every worker slot is taken)
    pub status: String,
    /// Module name ("vox-train")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Jobs currently held in the registry
    pub tracked_jobs: usize,
    /// Jobs pending or training
    pub active_jobs: usize,
    pub running_workers: usize,
    pub worker_capacity: usize,
    /// Updates received for job ids the registry does not know
    pub unknown_job_updates: u64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let running_workers = state.supervisor.running_workers();
    let worker_capacity = state.supervisor.capacity();
    let status = if running_workers >= worker_capacity {
        "busy"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status: status.to_string(),
        module: MODULE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        tracked_jobs: state.registry.len().await,
        active_jobs: state.registry.active_count().await,
        running_workers,
        worker_capacity,
        unknown_job_updates: state.registry.unknown_update_count(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
