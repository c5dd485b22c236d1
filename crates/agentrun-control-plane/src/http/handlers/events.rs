//! Live progress over Server-Sent Events.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{Stream, StreamExt};
use tracing::{debug, warn};

use agentrun_core::ProgressEvent;

use super::parse_project;
use crate::http::responses::ApiError;
use crate::state::AppState;

/// Stream a project's progress events as they are published.
///
/// The stream starts empty: events published before the client connected
/// are not replayed. It ends when the client disconnects or the server
/// begins shutting down.
pub async fn project_events(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let project = parse_project(project)?;
    debug!(project = %project, "Progress stream opened");

    let stream = state
        .orchestrator
        .subscribe(&project)
        .map(|event| Ok(progress_event_to_sse(&event)))
        .take_until(state.closed());

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Convert a ProgressEvent to an SSE Event named after its kind.
fn progress_event_to_sse(event: &ProgressEvent) -> Event {
    let sse = Event::default()
        .event(event.kind().as_str())
        .id(event.id.as_str());

    match serde_json::to_string(event) {
        Ok(data) => sse.data(data),
        Err(e) => {
            warn!(error = %e, "Failed to serialize progress event");
            sse.comment("unserializable event")
        }
    }
}
