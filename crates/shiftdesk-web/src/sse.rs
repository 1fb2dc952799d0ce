//! Server-Sent Events for sync status.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use shiftdesk_cache::StatusStream;
use tokio_stream::StreamExt;

/// Create an SSE stream from a status subscription.
///
/// The subscription ends when the client disconnects and the stream is dropped.
pub fn create_sse_stream(
    statuses: StatusStream,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let stream = statuses.filter_map(|status| {
        serde_json::to_string(&status)
            .ok()
            .map(|data| Ok(Event::default().data(data)))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
