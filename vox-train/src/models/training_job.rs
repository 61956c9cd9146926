//! Training job state machine
//!
//! A job moves PENDING → TRAINING → COMPLETED, or to FAILED from any
//! non-terminal state. TRAINING is entered on the first progress report.
//! Terminal states never transition further.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Training job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Registered, worker launched, no progress reported yet
    Pending,
    /// Worker has reported at least one progress value
    Training,
    /// Worker exited with status 0
    Completed,
    /// Launch error, non-zero exit, cancellation, timeout or restart
    Failed,
}

impl JobStatus {
    /// Check if status is terminal (finished)
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Lowercase name, as serialized
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Training => "training",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parse the lowercase name written by `as_str`
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "training" => Some(JobStatus::Training),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Terminal outcome applied to a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Worker succeeded; `model_path` is where the trained model lands
    Completed { model_path: String },
    /// Job failed; `exit_code` is set when the worker exited on its own
    Failed {
        error: String,
        exit_code: Option<i32>,
    },
}

impl JobOutcome {
    /// Failure without an exit code (launch error, cancel, timeout)
    pub fn failed(error: impl Into<String>) -> Self {
        JobOutcome::Failed {
            error: error.into(),
            exit_code: None,
        }
    }
}

/// Training job record
///
/// Owned exclusively by the job registry; everything else sees clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingJob {
    /// Unique job identifier (`train_<uuid>`)
    pub id: String,

    /// Opaque owner reference supplied by the caller
    pub user_id: String,

    /// Current status
    pub status: JobStatus,

    /// Percent complete, 0-100
    pub progress: u8,

    /// Trained model location, set only on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,

    /// Failure description, set only on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Worker exit code, when the worker exited by itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Input audio file paths handed to the worker
    pub audio_files: Vec<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Set on entering a terminal state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TrainingJob {
    /// Create new pending job
    pub fn new(id: String, user_id: String, audio_files: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            status: JobStatus::Pending,
            progress: 0,
            model_path: None,
            error: None,
            exit_code: None,
            audio_files,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Check if job is terminal (finished)
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a progress report from the worker
    ///
    /// Clamps to 100, never lowers progress, and moves PENDING to TRAINING.
    /// Returns true when status or progress changed.
    pub fn apply_progress(&mut self, progress: u8) -> bool {
        if self.is_terminal() {
            return false;
        }

        let progress = progress.min(100);
        let mut changed = false;

        if self.status == JobStatus::Pending {
            self.status = JobStatus::Training;
            changed = true;
        }

        if progress > self.progress {
            self.progress = progress;
            changed = true;
        }

        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }

    /// Move the job to a terminal state
    ///
    /// Returns false (and leaves the job untouched) if already terminal.
    pub fn finish(&mut self, outcome: JobOutcome) -> bool {
        if self.is_terminal() {
            return false;
        }

        match outcome {
            JobOutcome::Completed { model_path } => {
                self.status = JobStatus::Completed;
                self.progress = 100;
                self.model_path = Some(model_path);
                self.error = None;
                self.exit_code = Some(0);
            }
            JobOutcome::Failed { error, exit_code } => {
                self.status = JobStatus::Failed;
                self.error = Some(error);
                self.model_path = None;
                self.exit_code = exit_code;
            }
        }

        let now = Utc::now();
        self.updated_at = now;
        self.finished_at = Some(now);
        true
    }
}
