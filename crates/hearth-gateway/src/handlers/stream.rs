//! Server-sent change-event stream.

use crate::state::AppState;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use std::convert::Infallible;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

/// `GET /api/events` — every `state_changed` event as one SSE message.
///
/// A consumer that falls behind the broadcast buffer loses the oldest
/// events (logged) rather than stalling the kernel.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.events.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(|item| match item {
        Ok(event) => Some(Ok(Event::default().data(event.wire_json().to_string()))),
        Err(BroadcastStreamRecvError::Lagged(missed)) => {
            warn!(missed, "SSE consumer lagged; skipping events");
            None
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
