//! Live device event stream over Server-Sent Events.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use super::AppState;
use crate::model::DeviceEvent;

fn to_sse(event: &DeviceEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(data) => Some(Event::default().event(event.kind.as_str()).data(data)),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize device event");
            None
        }
    }
}

/// `GET /events/stream`: one SSE message per recorded device event, named
/// after the event kind. Slow clients skip what they missed.
pub async fn stream_events(State(state): State<Arc<AppState>>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.registry().subscribe()).filter_map(|result| match result {
        Ok(event) => to_sse(&event).map(Ok),
        Err(e) => {
            tracing::debug!(error = %e, "Event stream subscriber lagged");
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
