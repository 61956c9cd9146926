//! Job registry
//!
//! Single source of truth for every training job. The registry is an owned
//! handle: clones share the same map, and every mutation happens under the
//! write lock so status readers never observe a half-applied transition.
//!
//! Updates for unknown job ids are no-ops, but they indicate the registry and
//! a supervised process disagree about which jobs exist, so each one is
//! logged and counted.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

use crate::models::{JobOutcome, TrainingJob};

/// Shared, synchronized job registry
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, TrainingJob>>>,
    unknown_updates: Arc<AtomicU64>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending job
    ///
    /// The caller guarantees `id` is fresh.
    pub async fn create(
        &self,
        id: String,
        user_id: String,
        audio_files: Vec<String>,
    ) -> TrainingJob {
        let job = TrainingJob::new(id.clone(), user_id, audio_files);
        self.jobs.write().await.insert(id, job.clone());
        job
    }

    /// Insert a job loaded from persistent storage
    pub async fn restore(&self, job: TrainingJob) {
        self.jobs.write().await.insert(job.id.clone(), job);
    }

    /// Snapshot of a job, or None if the id was never registered (or evicted)
    pub async fn get(&self, id: &str) -> Option<TrainingJob> {
        self.jobs.read().await.get(id).cloned()
    }

    /// Apply a progress report
    ///
    /// Returns the updated snapshot when status or progress changed.
    pub async fn set_progress(&self, id: &str, progress: u8) -> Option<TrainingJob> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(id) {
            Some(job) => job.apply_progress(progress).then(|| job.clone()),
            None => {
                self.record_unknown(id, "set_progress");
                None
            }
        }
    }

    /// Move a job to a terminal state
    ///
    /// Returns the updated snapshot, or None if the job is unknown or
    /// already terminal.
    pub async fn set_terminal(&self, id: &str, outcome: JobOutcome) -> Option<TrainingJob> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(id) {
            Some(job) => job.finish(outcome).then(|| job.clone()),
            None => {
                self.record_unknown(id, "set_terminal");
                None
            }
        }
    }

    /// All jobs belonging to a user, newest first
    pub async fn list_for_user(&self, user_id: &str) -> Vec<TrainingJob> {
        let mut jobs: Vec<TrainingJob> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.user_id == user_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Number of tracked jobs
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Number of jobs not yet in a terminal state
    pub async fn active_count(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|job| !job.is_terminal())
            .count()
    }

    /// Number of updates that targeted an unknown job id
    pub fn unknown_update_count(&self) -> u64 {
        self.unknown_updates.load(Ordering::Relaxed)
    }

    /// Snapshot of every tracked job
    pub async fn snapshot(&self) -> Vec<TrainingJob> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Evict finished jobs
    ///
    /// Removes terminal jobs that finished before `cutoff_for(now, ttl)`, then,
    /// while more than `max_retained` jobs remain, the oldest-finished
    /// terminal jobs. Jobs still pending or training are never evicted.
    /// Returns the ids of the evicted jobs.
    pub async fn evict(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
        max_retained: usize,
    ) -> Vec<String> {
        let cutoff = cutoff_for(now, ttl);

        let mut jobs = self.jobs.write().await;
        let mut evicted: Vec<String> = jobs
            .values()
            .filter(|job| job.is_terminal())
            .filter(|job| job.finished_at.map_or(false, |finished_at| finished_at < cutoff))
            .map(|job| job.id.clone())
            .collect();
        for id in &evicted {
            jobs.remove(id);
        }

        if jobs.len() > max_retained {
            let mut finished: Vec<(DateTime<Utc>, String)> = jobs
                .values()
                .filter(|job| job.is_terminal())
                .map(|job| (job.finished_at.unwrap_or(job.updated_at), job.id.clone()))
                .collect();
            finished.sort();

            let excess = jobs.len() - max_retained;
            for (_, id) in finished.into_iter().take(excess) {
                jobs.remove(&id);
                evicted.push(id);
            }
        }

        evicted
    }

    fn record_unknown(&self, id: &str, operation: &str) {
        let total = self.unknown_updates.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            job_id = %id,
            operation,
            total,
            "Update for unknown training job (registry/process desynchronization)"
        );
    }
}

/// Oldest `finished_at` a terminal job may have and still be retained
pub fn cutoff_for(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
    now.checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
