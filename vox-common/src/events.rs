//! Event types for the Vox event system
//!
//! Provides the training job lifecycle events and the EventBus that carries
//! them to SSE clients and the job persister.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Vox event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VoxEvent {
    /// Training job registered and worker launch attempted
    TrainingJobSubmitted {
        job_id: String,
        user_id: String,
        file_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Worker reported a new progress value
    ///
    /// Only emitted when the stored progress or status actually changed.
    TrainingProgress {
        job_id: String,
        progress: u8,
        timestamp: DateTime<Utc>,
    },

    /// Worker exited successfully
    TrainingJobCompleted {
        job_id: String,
        model_path: String,
        timestamp: DateTime<Utc>,
    },

    /// Job reached the failed state (launch error, non-zero exit,
    /// cancellation, timeout or restart interruption)
    TrainingJobFailed {
        job_id: String,
        error: String,
        exit_code: Option<i32>,
        timestamp: DateTime<Utc>,
    },
}

impl VoxEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            VoxEvent::TrainingJobSubmitted { .. } => "TrainingJobSubmitted",
            VoxEvent::TrainingProgress { .. } => "TrainingProgress",
            VoxEvent::TrainingJobCompleted { .. } => "TrainingJobCompleted",
            VoxEvent::TrainingJobFailed { .. } => "TrainingJobFailed",
        }
    }

    /// Id of the job this event concerns
    pub fn job_id(&self) -> &str {
        match self {
            VoxEvent::TrainingJobSubmitted { job_id, .. }
            | VoxEvent::TrainingProgress { job_id, .. }
            | VoxEvent::TrainingJobCompleted { job_id, .. }
            | VoxEvent::TrainingJobFailed { job_id, .. } => job_id,
        }
    }
}

/// Broadcast bus for VoxEvent
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<VoxEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers that fall more than `capacity` events behind
    /// receive `RecvError::Lagged` and skip ahead.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<VoxEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: VoxEvent) -> Result<usize, broadcast::error::SendError<VoxEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: VoxEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
