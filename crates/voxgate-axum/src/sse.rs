//! Server-Sent Events chat adapter.
//!
//! `POST /chat/stream` runs the same dispatcher as the WebSocket endpoint
//! with a single registered consumer, serializing each event as a
//! `data: <json>\n\n` frame. Dropping the response stream (client
//! disconnect) cancels the workflow.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures_util::stream::{self, Stream};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use voxgate_core::bus::{EventReceiver, StreamBus};
use voxgate_core::request::ChatRequest;
use voxgate_core::workflow::{self, WorkflowChannels};

use crate::error::HttpError;
use crate::state::AppState;

/// Cancels the workflow when the client stops reading the stream.
struct DrainGuard(CancellationToken);

impl Drop for DrainGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// `POST /chat/stream` — Server-Sent Events transport.
pub async fn chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>> + Send + 'static>, HttpError> {
    let claims = state.auth.verify_bearer(&headers)?;

    let (bus, token) = StreamBus::new(state.queue_capacity);
    let (_consumer_id, receiver) = bus.register_consumer();

    let cancel = CancellationToken::new();
    let channels = WorkflowChannels::detached(cancel.clone());
    tokio::spawn(workflow::run(
        Arc::clone(&state.deps),
        bus,
        token,
        request,
        claims.sub,
        channels,
    ));

    let stream = stream::unfold(
        (receiver, DrainGuard(cancel)),
        |(mut receiver, guard)| async move {
            let event = receiver.recv().await?;
            let frame = match event.to_json() {
                Ok(json) => SseEvent::default().data(json),
                Err(err) => {
                    warn!(error = %err, "failed to serialize event for SSE");
                    SseEvent::default().data("{}")
                }
            };
            Some((Ok(frame), (receiver, guard)))
        },
    );

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(30))
            .text("ping"),
    ))
}

/// Drain a consumer to completion, for the non-streaming HTTP collector.
pub(crate) async fn drain_all(mut receiver: EventReceiver) -> Vec<voxgate_core::event::Event> {
    let mut events = Vec::new();
    while let Some(event) = receiver.recv().await {
        events.push(event);
    }
    events
}
