use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::state::AppState;

/// Live processing events as Server-Sent Events. Each frame is the
/// `{type, sceneId, data}` wire object. Slow consumers lose events past
/// their buffer; clients refresh state on reconnect.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (subscriber_id, rx) = state.events.subscribe();
    debug!(subscriber = %subscriber_id, "event stream opened");

    let stream = ReceiverStream::new(rx).filter_map(|event| async move {
        match Event::default().json_data(&event) {
            Ok(frame) => Some(Ok(frame)),
            Err(_) => None,
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
