//! Server-sent event framing for relayed streams.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use std::convert::Infallible;

/// Wrap relayed data payloads as SSE `data:` events, with keep-alive comments while idle.
pub fn sse_response<S>(stream: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = String> + Send + 'static,
{
    let events = stream.map(|data| Ok::<Event, Infallible>(Event::default().data(data)));
    Sse::new(events).keep_alive(KeepAlive::default())
}
