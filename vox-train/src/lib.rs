//! vox-train library interface
//!
//! Exposes the job registry, process supervisor and HTTP router for
//! integration testing

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use vox_common::events::EventBus;

use crate::config::TrainerConfig;
use crate::services::{JobRegistry, ProcessSupervisor};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Job state, shared with the supervisor
    pub registry: JobRegistry,
    /// Launches and monitors training workers
    pub supervisor: ProcessSupervisor,
    /// Event bus for SSE broadcasting and persistence
    pub event_bus: EventBus,
    /// Where uploaded audio is stored
    pub upload_dir: Arc<PathBuf>,
    /// Request body limit for upload routes
    pub max_upload_bytes: usize,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: &TrainerConfig, registry: JobRegistry, event_bus: EventBus) -> Self {
        let supervisor = ProcessSupervisor::new(config, registry.clone(), event_bus.clone());
        Self {
            registry,
            supervisor,
            event_bus,
            upload_dir: Arc::new(config.upload_dir.clone()),
            max_upload_bytes: config.max_upload_bytes,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::training_routes())
        .merge(api::upload_routes())
        .route("/api/audio/train/events", get(api::training_event_stream))
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
