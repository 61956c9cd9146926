//! Server-Sent Events (SSE) for training job updates

use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// GET /api/audio/train/events query
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStreamQuery {
    /// Only forward events for this job
    pub job_id: Option<String>,
}

/// GET /api/audio/train/events - SSE stream of job lifecycle events
///
/// Streams events:
/// - TrainingJobSubmitted
/// - TrainingProgress
/// - TrainingJobCompleted
/// - TrainingJobFailed
pub async fn training_event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventStreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(job_id = ?query.job_id, "New SSE client connected to training events");

    let mut rx = state.event_bus.subscribe();
    let filter = query.job_id;

    let stream = async_stream::stream! {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SSE: client lagged, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            if let Some(job_id) = &filter {
                if event.job_id() != job_id {
                    continue;
                }
            }

            let event_type = event.event_type();
            match serde_json::to_string(&event) {
                Ok(event_json) => {
                    debug!("SSE: Broadcasting training event: {}", event_type);
                    yield Ok(Event::default()
                        .event(event_type)
                        .data(event_json));
                }
                Err(e) => {
                    warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                }
            }
        }
        debug!("SSE: training event stream ended");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
