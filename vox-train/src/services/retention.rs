//! Retention reaper
//!
//! Periodically evicts finished jobs from the registry so a long-running
//! service does not grow without bound. With a database attached the same
//! jobs are deleted from the store.

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::job_registry::{cutoff_for, JobRegistry};
use crate::config::RetentionConfig;
use crate::db;

/// Run one eviction pass
///
/// Returns the number of jobs evicted from the registry.
pub async fn reap_once(
    registry: &JobRegistry,
    pool: Option<&SqlitePool>,
    config: &RetentionConfig,
) -> usize {
    let now = Utc::now();
    let evicted = registry
        .evict(now, config.retention, config.max_retained_jobs)
        .await;

    if let Some(pool) = pool {
        prune_store(pool, &evicted, cutoff_for(now, config.retention)).await;
    }

    if evicted.is_empty() {
        debug!("Retention pass evicted nothing");
    } else {
        let remaining = registry.len().await;
        info!(
            evicted = evicted.len(),
            remaining, "Evicted finished training jobs"
        );
    }
    evicted.len()
}

async fn prune_store(pool: &SqlitePool, evicted: &[String], cutoff: chrono::DateTime<Utc>) {
    match db::jobs::delete_jobs(pool, evicted).await {
        Ok(deleted) if deleted > 0 => debug!(deleted, "Deleted evicted jobs from database"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Failed to delete evicted jobs from database"),
    }

    match db::jobs::prune_finished_before(pool, cutoff).await {
        Ok(pruned) if pruned > 0 => info!(pruned, "Pruned expired jobs from database"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Failed to prune expired jobs from database"),
    }
}

/// Spawn the background reaper
pub fn spawn_reaper(
    registry: JobRegistry,
    pool: Option<SqlitePool>,
    config: RetentionConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.reaper_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            reap_once(&registry, pool.as_ref(), &config).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobOutcome;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reap_once_applies_cap() {
        let registry = JobRegistry::new();
        for id in ["train_1", "train_2", "train_3"] {
            registry
                .create(id.to_string(), "u".to_string(), vec!["a.wav".to_string()])
                .await;
        }
        registry.set_terminal("train_1", JobOutcome::failed("x")).await;

        let config = RetentionConfig {
            retention: Duration::from_secs(3600),
            max_retained_jobs: 2,
            reaper_interval: Duration::from_secs(60),
        };

        assert_eq!(reap_once(&registry, None, &config).await, 1);
        assert!(registry.get("train_1").await.is_none());
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_reap_once_deletes_evicted_rows() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = db::init_database_pool(&dir.path().join("vox-train.db"))
            .await
            .unwrap();
        let registry = JobRegistry::new();
        for id in ["train_done", "train_live"] {
            let job = registry
                .create(id.to_string(), "u".to_string(), vec!["a.wav".to_string()])
                .await;
            db::jobs::save_job(&pool, &job).await.unwrap();
        }
        let done = registry
            .set_terminal("train_done", JobOutcome::failed("x"))
            .await
            .unwrap();
        db::jobs::save_job(&pool, &done).await.unwrap();

        let config = RetentionConfig {
            retention: Duration::ZERO,
            max_retained_jobs: 100,
            reaper_interval: Duration::from_secs(60),
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(reap_once(&registry, Some(&pool), &config).await, 1);
        assert!(db::jobs::load_job(&pool, "train_done").await.unwrap().is_none());
        assert!(db::jobs::load_job(&pool, "train_live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_spawned_reaper_evicts_expired_jobs() {
        let registry = JobRegistry::new();
        registry
            .create("train_old".to_string(), "u".to_string(), vec![])
            .await;
        registry.set_terminal("train_old", JobOutcome::failed("x")).await;

        let config = RetentionConfig {
            retention: Duration::ZERO,
            max_retained_jobs: 100,
            reaper_interval: Duration::from_millis(20),
        };
        let handle = spawn_reaper(registry.clone(), None, config);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while registry.get("train_old").await.is_some() {
            assert!(tokio::time::Instant::now() < deadline, "reaper never ran");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(registry.get("train_old").await.is_none());
        handle.abort();
    }
}
