//! Training process supervisor
//!
//! Launches one external worker per job and drives the job registry from the
//! worker's lifecycle:
//!
//! - stdout is framed into lines and scanned for progress markers; updates
//!   are applied in output order
//! - exit status 0 completes the job, anything else fails it
//! - cancellation and the per-job deadline kill the worker and fail the job
//!
//! A semaphore bounds the number of live workers. Submissions beyond the
//! limit are rejected before any job is registered.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vox_common::events::{EventBus, VoxEvent};
use vox_common::ids;

use super::job_registry::JobRegistry;
use super::progress_parser::{parse_progress, WorkerLineCodec};
use crate::config::{TrainerConfig, WorkerConfig};
use crate::models::{JobOutcome, TrainingJob};

/// Detail recorded when the worker exits non-zero
pub const PROCESS_FAILED_DETAIL: &str = "Training process failed";

/// Detail recorded when a job is cancelled
pub const CANCELLED_DETAIL: &str = "Training cancelled";

/// Supervisor errors surfaced to the submitting or cancelling caller
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Admission limit reached; no job was registered
    #[error("Training capacity exhausted ({0} jobs already running)")]
    AtCapacity(usize),

    /// Worker could not be started; the job is already marked failed
    #[error("Failed to launch training process for job {job_id}: {message}")]
    Launch { job_id: String, message: String },

    /// No job with this id
    #[error("Training job not found: {0}")]
    NotFound(String),

    /// Job already reached a terminal state
    #[error("Training job {job_id} already {status}")]
    AlreadyFinished { job_id: String, status: &'static str },
}

/// A held admission slot
///
/// Returned by `ProcessSupervisor::reserve`; dropping it without starting a
/// job frees the slot.
#[derive(Debug)]
pub struct AdmissionPermit(OwnedSemaphorePermit);

/// How supervision of a live worker ended
enum Finish {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    TimedOut(Duration),
}

/// Process supervisor
///
/// Cheap to clone; clones share the registry, admission semaphore and the
/// cancellation tokens of running workers.
#[derive(Clone)]
pub struct ProcessSupervisor {
    registry: JobRegistry,
    event_bus: EventBus,
    worker: Arc<WorkerConfig>,
    models_dir: Arc<PathBuf>,
    permits: Arc<Semaphore>,
    running: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl ProcessSupervisor {
    pub fn new(config: &TrainerConfig, registry: JobRegistry, event_bus: EventBus) -> Self {
        Self {
            registry,
            event_bus,
            worker: Arc::new(config.worker.clone()),
            models_dir: Arc::new(config.models_dir.clone()),
            permits: Arc::new(Semaphore::new(config.worker.max_concurrent_jobs)),
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a job and launch its worker
    ///
    /// Returns as soon as the worker is started; supervision continues on a
    /// background task. A launch failure is both recorded on the job and
    /// returned here.
    pub async fn start_training(
        &self,
        user_id: &str,
        audio_files: Vec<String>,
    ) -> Result<TrainingJob, SupervisorError> {
        let permit = self.reserve()?;
        self.start_reserved(permit, user_id, audio_files).await
    }

    /// Take an admission slot without registering a job yet
    pub fn reserve(&self) -> Result<AdmissionPermit, SupervisorError> {
        self.permits
            .clone()
            .try_acquire_owned()
            .map(AdmissionPermit)
            .map_err(|_| SupervisorError::AtCapacity(self.worker.max_concurrent_jobs))
    }

    /// Register a job and launch its worker under an already held slot
    pub async fn start_reserved(
        &self,
        permit: AdmissionPermit,
        user_id: &str,
        audio_files: Vec<String>,
    ) -> Result<TrainingJob, SupervisorError> {
        let AdmissionPermit(permit) = permit;
        let job_id = ids::generate_job_id();
        let job = self
            .registry
            .create(job_id.clone(), user_id.to_string(), audio_files)
            .await;

        info!(
            job_id = %job.id,
            user_id = %job.user_id,
            files = job.audio_files.len(),
            "Training job registered"
        );
        self.event_bus.emit_lossy(VoxEvent::TrainingJobSubmitted {
            job_id: job.id.clone(),
            user_id: job.user_id.clone(),
            file_count: job.audio_files.len(),
            timestamp: job.created_at,
        });

        // Tracked before launch so a cancel racing the spawn still reaches the worker
        let token = CancellationToken::new();
        self.running
            .write()
            .await
            .insert(job_id.clone(), token.clone());

        let child = match self.spawn_worker(&job) {
            Ok(child) => child,
            Err(e) => {
                self.running.write().await.remove(&job_id);
                let message = e.to_string();
                error!(job_id = %job_id, error = %message, "Failed to launch training process");
                self.finish(
                    &job_id,
                    JobOutcome::failed(format!("Failed to launch training process: {}", message)),
                )
                .await;
                return Err(SupervisorError::Launch { job_id, message });
            }
        };

        let supervisor = self.clone();
        let user_id = job.user_id.clone();
        tokio::spawn(async move {
            supervisor.supervise(job_id, user_id, child, token, permit).await;
        });

        Ok(job)
    }

    /// Cancel a pending or training job
    ///
    /// The job is marked failed immediately; the worker is killed by its
    /// supervision task.
    pub async fn cancel(&self, job_id: &str) -> Result<TrainingJob, SupervisorError> {
        let job = self
            .registry
            .get(job_id)
            .await
            .ok_or_else(|| SupervisorError::NotFound(job_id.to_string()))?;

        if job.is_terminal() {
            return Err(SupervisorError::AlreadyFinished {
                job_id: job_id.to_string(),
                status: job.status.as_str(),
            });
        }

        // The worker may have finished between the read and the transition
        let job = match self.finish(job_id, JobOutcome::failed(CANCELLED_DETAIL)).await {
            Some(job) => job,
            None => {
                let status = self
                    .registry
                    .get(job_id)
                    .await
                    .map(|job| job.status.as_str())
                    .unwrap_or("evicted");
                return Err(SupervisorError::AlreadyFinished {
                    job_id: job_id.to_string(),
                    status,
                });
            }
        };

        if let Some(token) = self.running.read().await.get(job_id) {
            token.cancel();
        }

        info!(job_id = %job_id, "Training job cancelled");
        Ok(job)
    }

    /// Number of workers currently holding an admission permit
    pub fn running_workers(&self) -> usize {
        self.worker.max_concurrent_jobs - self.permits.available_permits()
    }

    /// Admission limit
    pub fn capacity(&self) -> usize {
        self.worker.max_concurrent_jobs
    }

    /// Cancel every running worker (used on shutdown)
    pub async fn cancel_all(&self) {
        let ids: Vec<String> = self.running.read().await.keys().cloned().collect();
        for job_id in ids {
            if let Err(e) = self.cancel(&job_id).await {
                debug!(job_id = %job_id, error = %e, "Cancel on shutdown skipped");
            }
        }
    }

    fn spawn_worker(&self, job: &TrainingJob) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.worker.program);
        if let Some(script) = &self.worker.script {
            cmd.arg(script);
        }
        cmd.arg("--user_id")
            .arg(&job.user_id)
            .arg("--audio_files")
            .args(&job.audio_files)
            .arg("--job_id")
            .arg(&job.id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            job_id = %job.id,
            program = %self.worker.program,
            script = ?self.worker.script,
            "Spawning training worker"
        );
        cmd.spawn()
    }

    /// Background task owning one worker until it is gone
    async fn supervise(
        self,
        job_id: String,
        user_id: String,
        mut child: Child,
        token: CancellationToken,
        _permit: OwnedSemaphorePermit,
    ) {
        if let Some(pid) = child.id() {
            info!(job_id = %job_id, pid, "Training worker started");
        }

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(job_id.clone(), stderr));
        }
        let stdout = child.stdout.take();
        let deadline = self.worker.job_timeout;

        let finish = tokio::select! {
            result = self.follow_output(&job_id, stdout, &mut child) => Finish::Exited(result),
            _ = token.cancelled() => Finish::Cancelled,
            elapsed = sleep_until_deadline(deadline) => Finish::TimedOut(elapsed),
        };

        let outcome = match finish {
            Finish::Exited(Ok(status)) if status.success() => {
                let model_path = TrainerConfig::model_dir_for(&self.models_dir, &user_id, &job_id);
                JobOutcome::Completed {
                    model_path: model_path.to_string_lossy().into_owned(),
                }
            }
            Finish::Exited(Ok(status)) => {
                warn!(job_id = %job_id, exit_status = %status, "Training worker failed");
                JobOutcome::Failed {
                    error: PROCESS_FAILED_DETAIL.to_string(),
                    exit_code: status.code(),
                }
            }
            Finish::Exited(Err(e)) => {
                error!(job_id = %job_id, error = %e, "Lost track of training worker");
                kill_worker(&job_id, &mut child).await;
                JobOutcome::failed(format!("{}: {}", PROCESS_FAILED_DETAIL, e))
            }
            Finish::Cancelled => {
                kill_worker(&job_id, &mut child).await;
                JobOutcome::failed(CANCELLED_DETAIL)
            }
            Finish::TimedOut(limit) => {
                warn!(job_id = %job_id, timeout_secs = limit.as_secs(), "Training worker timed out");
                kill_worker(&job_id, &mut child).await;
                JobOutcome::failed(format!("Training timed out after {}s", limit.as_secs()))
            }
        };

        self.finish(&job_id, outcome).await;
        self.running.write().await.remove(&job_id);
    }

    /// Read stdout to EOF, applying progress, then reap the worker
    async fn follow_output(
        &self,
        job_id: &str,
        stdout: Option<ChildStdout>,
        child: &mut Child,
    ) -> std::io::Result<ExitStatus> {
        if let Some(stdout) = stdout {
            let mut lines = FramedRead::new(stdout, WorkerLineCodec::new());
            while let Some(line) = lines.next().await {
                self.handle_output_line(job_id, &line?).await;
            }
        }

        child.wait().await
    }

    async fn handle_output_line(&self, job_id: &str, line: &str) {
        debug!(job_id = %job_id, "[worker] {}", line);

        let Some(progress) = parse_progress(line) else {
            return;
        };

        if let Some(job) = self.registry.set_progress(job_id, progress).await {
            self.event_bus.emit_lossy(VoxEvent::TrainingProgress {
                job_id: job.id,
                progress: job.progress,
                timestamp: job.updated_at,
            });
        }
    }

    /// Apply a terminal outcome and announce it
    ///
    /// Returns the updated job, or None if it was already terminal.
    async fn finish(&self, job_id: &str, outcome: JobOutcome) -> Option<TrainingJob> {
        let job = self.registry.set_terminal(job_id, outcome).await?;
        let timestamp = job.finished_at.unwrap_or(job.updated_at);

        match (&job.model_path, &job.error) {
            (Some(model_path), _) => {
                info!(job_id = %job.id, model_path = %model_path, "Training job completed");
                self.event_bus.emit_lossy(VoxEvent::TrainingJobCompleted {
                    job_id: job.id.clone(),
                    model_path: model_path.clone(),
                    timestamp,
                });
            }
            (None, error) => {
                let error = error.clone().unwrap_or_default();
                info!(
                    job_id = %job.id,
                    error = %error,
                    exit_code = ?job.exit_code,
                    "Training job failed"
                );
                self.event_bus.emit_lossy(VoxEvent::TrainingJobFailed {
                    job_id: job.id.clone(),
                    error,
                    exit_code: job.exit_code,
                    timestamp,
                });
            }
        }

        Some(job)
    }
}

/// Resolve after the deadline; never resolves when there is none
async fn sleep_until_deadline(deadline: Option<Duration>) -> Duration {
    match deadline {
        Some(limit) => {
            tokio::time::sleep(limit).await;
            limit
        }
        None => std::future::pending().await,
    }
}

async fn kill_worker(job_id: &str, child: &mut Child) {
    if let Err(e) = child.kill().await {
        // Already exited between the signal and the kill
        debug!(job_id = %job_id, error = %e, "Kill of training worker failed");
    }
}

/// Forward worker stderr to the log
async fn drain_stderr(job_id: String, stderr: ChildStderr) {
    if let Err(e) = forward_lines(&job_id, stderr).await {
        debug!(job_id = %job_id, error = %e, "Worker stderr closed with error");
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(job_id: &str, reader: R) -> std::io::Result<()> {
    let mut lines = FramedRead::new(reader, WorkerLineCodec::new());
    while let Some(line) = lines.next().await {
        debug!(job_id = %job_id, "[worker stderr] {}", line?);
    }
    Ok(())
}
