//! vox-train - Voice model training microservice
//!
//! Accepts training submissions over HTTP, runs one external training
//! worker per job and serves job status while the workers run.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};
use vox_common::events::EventBus;
use vox_train::config::{CliArgs, TrainerConfig};
use vox_train::services::job_registry::cutoff_for;
use vox_train::services::{spawn_reaper, JobRegistry};
use vox_train::{build_router, db, AppState};

const EVENT_BUS_CAPACITY: usize = 1000;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config = TrainerConfig::resolve(&args).context("Failed to resolve configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    // Build identification first, before any slow startup work
    info!(
        "Starting vox-train v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config.config_file {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("No config file found, using defaults"),
    }
    info!("Root folder: {}", config.root_folder.display());
    info!(
        program = %config.worker.program,
        script = ?config.worker.script,
        max_concurrent_jobs = config.worker.max_concurrent_jobs,
        timeout_secs = ?config.worker.job_timeout.map(|t| t.as_secs()),
        "Training worker configured"
    );

    config
        .ensure_directories()
        .context("Failed to initialize root folder")?;

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let state = AppState::new(&config, JobRegistry::new(), event_bus.clone());

    let pool = match &config.database_path {
        Some(db_path) => {
            info!("Database: {}", db_path.display());
            let pool = db::init_database_pool(db_path).await?;

            let since = cutoff_for(Utc::now(), config.retention.retention);
            db::jobs::restore_jobs(&pool, &state.registry, since).await?;

            db::jobs::spawn_persister(pool.clone(), state.registry.clone(), &event_bus);
            Some(pool)
        }
        None => {
            warn!("No database configured; job state is kept in memory only");
            None
        }
    };

    spawn_reaper(state.registry.clone(), pool.clone(), config.retention.clone());

    let supervisor = state.supervisor.clone();
    let registry = state.registry.clone();
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down; cancelling running training jobs");
    supervisor.cancel_all().await;

    if let Some(pool) = &pool {
        match db::jobs::save_all(pool, &registry).await {
            Ok(count) => info!(count, "Flushed training jobs to database"),
            Err(e) => warn!(error = %e, "Failed to flush training jobs on shutdown"),
        }
        pool.close().await;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
