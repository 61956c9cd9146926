//! Training job persistence
//!
//! Snapshots are written by a persister task fed from the event bus, so the
//! supervisor never waits on the database.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vox_common::events::EventBus;
use vox_common::{Error, Result};

use crate::models::{JobOutcome, JobStatus, TrainingJob};
use crate::services::JobRegistry;

/// Failure detail for jobs that were live when the service stopped
pub const INTERRUPTED_DETAIL: &str = "Interrupted by service restart";

/// Insert or update a job snapshot
pub async fn save_job(pool: &SqlitePool, job: &TrainingJob) -> Result<()> {
    let audio_files = serde_json::to_string(&job.audio_files)
        .map_err(|e| Error::Internal(format!("Failed to serialize audio files: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO training_jobs (
            id, user_id, status, progress, model_path, error, exit_code,
            audio_files, created_at, updated_at, finished_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            progress = excluded.progress,
            model_path = excluded.model_path,
            error = excluded.error,
            exit_code = excluded.exit_code,
            updated_at = excluded.updated_at,
            finished_at = excluded.finished_at
        "#,
    )
    .bind(&job.id)
    .bind(&job.user_id)
    .bind(job.status.as_str())
    .bind(job.progress as i64)
    .bind(&job.model_path)
    .bind(&job.error)
    .bind(job.exit_code)
    .bind(&audio_files)
    .bind(db_timestamp(job.created_at))
    .bind(db_timestamp(job.updated_at))
    .bind(job.finished_at.map(db_timestamp))
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a single job
pub async fn load_job(pool: &SqlitePool, id: &str) -> Result<Option<TrainingJob>> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, status, progress, model_path, error, exit_code,
               audio_files, created_at, updated_at, finished_at
        FROM training_jobs
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| job_from_row(&row)).transpose()
}

/// Load jobs created at or after `since`, oldest first
///
/// Live jobs are always loaded so they can be closed out.
pub async fn load_recent_jobs(pool: &SqlitePool, since: DateTime<Utc>) -> Result<Vec<TrainingJob>> {
    let rows = sqlx::query(
        r#"
        SELECT id, user_id, status, progress, model_path, error, exit_code,
               audio_files, created_at, updated_at, finished_at
        FROM training_jobs
        WHERE created_at >= ? OR status IN ('pending', 'training')
        ORDER BY created_at
        "#,
    )
    .bind(db_timestamp(since))
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Save the snapshot of every job in the registry
///
/// Returns the number of jobs written.
pub async fn save_all(pool: &SqlitePool, registry: &JobRegistry) -> Result<usize> {
    let jobs = registry.snapshot().await;
    for job in &jobs {
        save_job(pool, job).await?;
    }
    Ok(jobs.len())
}

/// Delete the rows of the given jobs
pub async fn delete_jobs(pool: &SqlitePool, ids: &[String]) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut deleted = 0;
    for id in ids {
        deleted += sqlx::query("DELETE FROM training_jobs WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    }
    tx.commit().await?;

    Ok(deleted)
}

/// Delete finished jobs whose `finished_at` is before `cutoff`
pub async fn prune_finished_before(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM training_jobs
        WHERE status IN ('completed', 'failed')
          AND finished_at IS NOT NULL
          AND finished_at < ?
        "#,
    )
    .bind(db_timestamp(cutoff))
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Repopulate the registry from the database
///
/// Jobs that were pending or training when the previous process stopped
/// have no worker any more; they are restored as failed and written back.
/// Returns the number of restored jobs.
pub async fn restore_jobs(
    pool: &SqlitePool,
    registry: &JobRegistry,
    since: DateTime<Utc>,
) -> Result<usize> {
    let jobs = load_recent_jobs(pool, since).await?;
    let count = jobs.len();

    for mut job in jobs {
        if !job.is_terminal() {
            job.finish(JobOutcome::failed(INTERRUPTED_DETAIL));
            save_job(pool, &job).await?;
            warn!(job_id = %job.id, "Training job interrupted by restart");
        }
        registry.restore(job).await;
    }

    info!(count, "Restored training jobs from database");
    Ok(count)
}

/// Spawn the persister task
///
/// Saves the registry snapshot of every job an event refers to. Jobs that
/// were evicted before the event is handled are skipped. After a lag the
/// whole registry is written, since the skipped events are unknown.
pub fn spawn_persister(pool: SqlitePool, registry: JobRegistry, event_bus: &EventBus) -> JoinHandle<()> {
    let mut rx = event_bus.subscribe();

    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Job persister lagged; writing every tracked job");
                    if let Err(e) = save_all(&pool, &registry).await {
                        warn!(error = %e, "Failed to persist training jobs after lag");
                    }
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let Some(job) = registry.get(event.job_id()).await else {
                debug!(job_id = %event.job_id(), "Job gone before persisting");
                continue;
            };

            if let Err(e) = save_job(&pool, &job).await {
                warn!(job_id = %job.id, error = %e, "Failed to persist training job");
            }
        }
        debug!("Job persister stopped");
    })
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<TrainingJob> {
    let id: String = row.get("id");

    let status: String = row.get("status");
    let status = JobStatus::parse(&status).ok_or_else(|| {
        Error::Internal(format!("Unknown status '{}' for job {}", status, id))
    })?;

    let audio_files: String = row.get("audio_files");
    let audio_files: Vec<String> = serde_json::from_str(&audio_files)
        .map_err(|e| Error::Internal(format!("Failed to deserialize audio files: {}", e)))?;

    let progress: i64 = row.get("progress");

    Ok(TrainingJob {
        user_id: row.get("user_id"),
        status,
        progress: progress.clamp(0, 100) as u8,
        model_path: row.get("model_path"),
        error: row.get("error"),
        exit_code: row.get("exit_code"),
        audio_files,
        created_at: parse_timestamp(row.get("created_at"), "created_at")?,
        updated_at: parse_timestamp(row.get("updated_at"), "updated_at")?,
        finished_at: row
            .get::<Option<String>, _>("finished_at")
            .map(|s| parse_timestamp(s, "finished_at"))
            .transpose()?,
        id,
    })
}

/// Fixed-width UTC text, so SQL string comparison follows time order
fn db_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: String, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}
