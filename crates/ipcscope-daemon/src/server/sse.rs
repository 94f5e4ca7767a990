//! `GET /api/events`: the live event stream.
//!
//! One SSE `data:` line per envelope. Heartbeats go out as comment lines so
//! idle proxies keep the connection open.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use tokio_stream::Stream;
use tracing::debug;

use super::AppState;
use crate::bus::BusMessage;

pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = state.supervisor.bus().subscribe().await;
    debug!(subscriber_id = subscription.id(), "Event stream opened");

    // The subscription lives inside the stream; the transport dropping the
    // stream detaches it.
    let stream = async_stream::stream! {
        while let Some(message) = subscription.recv().await {
            match message {
                BusMessage::Envelope(json) => yield Ok(Event::default().data(&*json)),
                BusMessage::Heartbeat => yield Ok(Event::default().comment("heartbeat")),
            }
        }
    };
    Sse::new(stream)
}
