//! Training job persistence tests

use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use vox_common::events::{EventBus, VoxEvent};
use vox_train::db::{self, jobs};
use vox_train::models::{JobOutcome, JobStatus, TrainingJob};
use vox_train::services::JobRegistry;

async fn test_pool(dir: &TempDir) -> sqlx::SqlitePool {
    db::init_database_pool(&dir.path().join("vox-train.db"))
        .await
        .unwrap()
}

fn job(id: &str, user: &str) -> TrainingJob {
    TrainingJob::new(
        id.to_string(),
        user.to_string(),
        vec!["a.wav".to_string(), "b.wav".to_string()],
    )
}

#[tokio::test]
async fn test_save_and_load_job() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(&dir).await;

    let mut saved = job("train_1", "u1");
    saved.apply_progress(35);
    jobs::save_job(&pool, &saved).await.unwrap();

    let loaded = jobs::load_job(&pool, "train_1").await.unwrap().unwrap();
    assert_eq!(loaded.id, "train_1");
    assert_eq!(loaded.user_id, "u1");
    assert_eq!(loaded.status, JobStatus::Training);
    assert_eq!(loaded.progress, 35);
    assert_eq!(loaded.audio_files, saved.audio_files);
    assert_eq!(loaded.created_at, saved.created_at);

    assert!(jobs::load_job(&pool, "train_missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_save_is_an_upsert() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(&dir).await;

    let mut record = job("train_1", "u1");
    jobs::save_job(&pool, &record).await.unwrap();

    record.finish(JobOutcome::Failed {
        error: "Training process failed".to_string(),
        exit_code: Some(2),
    });
    jobs::save_job(&pool, &record).await.unwrap();

    let loaded = jobs::load_job(&pool, "train_1").await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Failed);
    assert_eq!(loaded.error.as_deref(), Some("Training process failed"));
    assert_eq!(loaded.exit_code, Some(2));
    assert!(loaded.finished_at.is_some());

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM training_jobs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_restore_marks_live_jobs_interrupted() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(&dir).await;

    let mut done = job("train_done", "u1");
    done.finish(JobOutcome::Completed {
        model_path: "/models/u1/train_done".to_string(),
    });
    let mut live = job("train_live", "u1");
    live.apply_progress(70);
    jobs::save_job(&pool, &done).await.unwrap();
    jobs::save_job(&pool, &live).await.unwrap();

    let registry = JobRegistry::new();
    let since = Utc::now() - chrono::Duration::hours(1);
    let restored = jobs::restore_jobs(&pool, &registry, since).await.unwrap();
    assert_eq!(restored, 2);

    let done = registry.get("train_done").await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);

    let live = registry.get("train_live").await.unwrap();
    assert_eq!(live.status, JobStatus::Failed);
    assert_eq!(live.error.as_deref(), Some(jobs::INTERRUPTED_DETAIL));
    assert_eq!(live.progress, 70);
    assert_eq!(registry.active_count().await, 0);

    // written back so a second restart sees it as finished
    let stored = jobs::load_job(&pool, "train_live").await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
}

#[tokio::test]
async fn test_restore_skips_old_finished_jobs() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(&dir).await;

    let mut old = job("train_old", "u1");
    old.finish(JobOutcome::failed("x"));
    jobs::save_job(&pool, &old).await.unwrap();

    let registry = JobRegistry::new();
    let since = Utc::now() + chrono::Duration::hours(1);
    let restored = jobs::restore_jobs(&pool, &registry, since).await.unwrap();

    assert_eq!(restored, 0);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_persister_writes_snapshot_on_event() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(&dir).await;
    let registry = JobRegistry::new();
    let event_bus = EventBus::new(16);

    let handle = jobs::spawn_persister(pool.clone(), registry.clone(), &event_bus);

    let created = registry
        .create("train_1".to_string(), "u1".to_string(), vec!["a.wav".to_string()])
        .await;
    let updated = registry.set_progress("train_1", 55).await.unwrap();
    event_bus
        .emit(VoxEvent::TrainingProgress {
            job_id: created.id.clone(),
            progress: updated.progress,
            timestamp: updated.updated_at,
        })
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let stored = loop {
        if let Some(stored) = jobs::load_job(&pool, "train_1").await.unwrap() {
            break stored;
        }
        assert!(tokio::time::Instant::now() < deadline, "snapshot never persisted");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert_eq!(stored.status, JobStatus::Training);
    assert_eq!(stored.progress, 55);

    handle.abort();
}

#[tokio::test]
async fn test_load_recent_jobs_filters_in_query() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(&dir).await;
    let now = Utc::now();

    let mut old = job("train_old", "u1");
    old.created_at = now - chrono::Duration::hours(3);
    old.finish(JobOutcome::failed("x"));
    let mut old_live = job("train_old_live", "u1");
    old_live.created_at = now - chrono::Duration::hours(3);
    let mut recent = job("train_recent", "u1");
    // whole second, compared against a fractional cutoff
    recent.created_at = chrono::DateTime::from_timestamp(now.timestamp(), 0).unwrap();
    recent.finish(JobOutcome::failed("x"));
    for record in [&old, &old_live, &recent] {
        jobs::save_job(&pool, record).await.unwrap();
    }

    let since = recent.created_at - chrono::Duration::milliseconds(1);
    let loaded = jobs::load_recent_jobs(&pool, since).await.unwrap();
    let ids: Vec<&str> = loaded.iter().map(|job| job.id.as_str()).collect();

    assert_eq!(ids, vec!["train_old_live", "train_recent"]);
}

#[tokio::test]
async fn test_prune_and_delete_remove_finished_rows() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(&dir).await;

    let mut expired = job("train_expired", "u1");
    expired.finish(JobOutcome::failed("x"));
    let mut evicted = job("train_evicted", "u1");
    evicted.finish(JobOutcome::failed("x"));
    let live = job("train_live", "u1");
    for record in [&expired, &evicted, &live] {
        jobs::save_job(&pool, record).await.unwrap();
    }

    let deleted = jobs::delete_jobs(&pool, &["train_evicted".to_string()])
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    let pruned = jobs::prune_finished_before(&pool, Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(pruned, 1);

    assert!(jobs::load_job(&pool, "train_expired").await.unwrap().is_none());
    assert!(jobs::load_job(&pool, "train_evicted").await.unwrap().is_none());
    assert!(jobs::load_job(&pool, "train_live").await.unwrap().is_some());
}

#[tokio::test]
async fn test_save_all_writes_every_tracked_job() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(&dir).await;
    let registry = JobRegistry::new();
    for id in ["train_1", "train_2", "train_3"] {
        registry
            .create(id.to_string(), "u1".to_string(), vec!["a.wav".to_string()])
            .await;
    }
    registry.set_progress("train_2", 40).await;

    assert_eq!(jobs::save_all(&pool, &registry).await.unwrap(), 3);

    let stored = jobs::load_job(&pool, "train_2").await.unwrap().unwrap();
    assert_eq!(stored.progress, 40);
}

#[tokio::test]
async fn test_persister_recovers_from_lag() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(&dir).await;
    let registry = JobRegistry::new();
    let event_bus = EventBus::new(2);

    // Not polled until this task yields, so every event below is queued first
    let handle = jobs::spawn_persister(pool.clone(), registry.clone(), &event_bus);

    let mut created = Vec::new();
    for n in 0..5 {
        created.push(
            registry
                .create(format!("train_{}", n), "u1".to_string(), vec!["a.wav".to_string()])
                .await,
        );
    }
    for job in &created {
        event_bus.emit_lossy(VoxEvent::TrainingJobSubmitted {
            job_id: job.id.clone(),
            user_id: job.user_id.clone(),
            file_count: job.audio_files.len(),
            timestamp: job.created_at,
        });
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM training_jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        if count == 5 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "lagged snapshots never persisted");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    handle.abort();
}
