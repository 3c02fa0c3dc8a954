//! WebSocket chat endpoint.
//!
//! `GET /chat/ws?token=<jwt>[&mode=realtime|proactive]` upgrades to the
//! event-stream protocol: the client sends JSON control messages (initial
//! request, `cancel`, `ping`, audio frames, `close_session`) and receives
//! the typed event catalog as JSON text frames.
//!
//! ## Task layout per connection
//!
//! * **writer** — owns the socket sink; everything outbound funnels through
//!   one channel so frames never interleave.
//! * **pump** — drains the session runtime's outbound event channel,
//!   serializes, and forwards to the writer.
//! * **keepalive** — sends `ping` every `keepalive` interval; three
//!   consecutive unanswered pings end the connection with a `closing`
//!   event.
//! * **ingest** — decodes inbound frames into [`ClientMessage`]s for the
//!   runtime; `pong` frames are consumed here to reset the keepalive
//!   counter.
//! * **runtime** — the [`SessionRuntime`] supervisor from `voxgate-core`.
//!
//! The handler waits for whichever of ingest / runtime / keepalive gives
//! up first, then lets the runtime run its cleanup path before tearing the
//! rest down.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use voxgate_core::event::Event;
use voxgate_core::request::{ChatRequest, RequestType};
use voxgate_core::runtime::{ClientMessage, SessionRuntime};

use crate::state::AppState;

/// Maximum unanswered keepalive pings before the server closes.
const MAX_MISSED_PONGS: u32 = 3;

/// Protocol version announced in `websocket_ready`.
const PROTOCOL_VERSION: &str = "2.0";

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
    pub mode: Option<String>,
}

/// `GET /chat/ws` — upgrade to the chat event stream.
pub async fn chat_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // Mode precedence: query param, then header, then (later) the payload's
    // request_type.
    let mode = query.mode.clone().or_else(|| {
        headers
            .get("x-chat-mode")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    });
    ws.on_upgrade(move |socket| handle_chat_ws(socket, state, query.token, mode))
}

async fn handle_chat_ws(
    socket: WebSocket,
    state: AppState,
    token: Option<String>,
    mode: Option<String>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Single writer: all frames funnel through this channel.
    let (writer_tx, mut writer_rx) = mpsc::channel::<String>(256);
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = writer_rx.recv().await {
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // Auth handshake: one error event and close on failure.
    let claims = match token.as_deref().map(|t| state.auth.verify(t)) {
        Some(Ok(claims)) => claims,
        other => {
            let message = match other {
                Some(Err(err)) => err.to_string(),
                _ => "missing token query parameter".to_string(),
            };
            warn!(error = %message, "websocket auth failed");
            send_event(&writer_tx, &Event::error(message, "authentication")).await;
            drop(writer_tx);
            let _ = writer.await;
            return;
        }
    };

    let Some(_connection) = state.try_acquire_connection() else {
        warn!("connection cap reached, rejecting websocket");
        send_event(
            &writer_tx,
            &Event::error("server is at connection capacity", "validation"),
        )
        .await;
        drop(writer_tx);
        let _ = writer.await;
        return;
    };

    info!(customer = %claims.sub, "websocket session opened");
    send_event(&writer_tx, &Event::websocket_ready(PROTOCOL_VERSION)).await;

    // ── Initial payload (strict schema) ──────────────────────────────────

    let initial = loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => match ClientMessage::parse(&text) {
                Ok(ClientMessage::Request(request)) => break Some(*request),
                Ok(ClientMessage::Ping) => {
                    send_event(&writer_tx, &Event::pong()).await;
                }
                Ok(ClientMessage::CloseSession) => break None,
                Ok(other) => {
                    debug!(message = ?other, "control message before initial payload");
                }
                Err(err) => {
                    send_event(&writer_tx, &Event::error(err.to_string(), err.stage())).await;
                }
            },
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break None,
            Some(Ok(_)) => {}
        }
    };
    let Some(initial) = initial else {
        drop(writer_tx);
        let _ = writer.await;
        return;
    };
    let initial = apply_mode(initial, mode.as_deref());

    // ── Session plumbing ─────────────────────────────────────────────────

    let (inbound_tx, inbound_rx) = mpsc::channel::<ClientMessage>(64);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Event>(256);

    let pump_writer = writer_tx.clone();
    let pump = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            match event.to_json() {
                Ok(json) => {
                    if pump_writer.send(json).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "event serialization failed, dropping"),
            }
        }
    });

    let missed_pongs = Arc::new(AtomicU32::new(0));
    let keepalive_writer = writer_tx.clone();
    let keepalive_missed = Arc::clone(&missed_pongs);
    let keepalive_interval = state.keepalive;
    let mut keepalive = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(keepalive_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // immediate first tick
        loop {
            ticker.tick().await;
            if keepalive_missed.load(Ordering::SeqCst) >= MAX_MISSED_PONGS {
                send_event(
                    &keepalive_writer,
                    &Event::closing("keepalive timeout: no pong received"),
                )
                .await;
                break;
            }
            send_event(&keepalive_writer, &Event::ping()).await;
            keepalive_missed.fetch_add(1, Ordering::SeqCst);
        }
    });

    let runtime = SessionRuntime::new(
        Arc::clone(&state.deps),
        claims.sub.clone(),
        state.queue_capacity,
    );
    let mut runtime_task =
        tokio::spawn(async move { runtime.run(inbound_rx, outbound_tx, initial).await });

    let ingest_writer = writer_tx.clone();
    let ingest_missed = Arc::clone(&missed_pongs);
    let mut ingest = tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => match ClientMessage::parse(&text) {
                    // Keepalive acks stay in the transport.
                    Ok(ClientMessage::Pong) => {
                        ingest_missed.store(0, Ordering::SeqCst);
                    }
                    Ok(message) => {
                        if inbound_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        send_event(&ingest_writer, &Event::error(err.to_string(), err.stage()))
                            .await;
                    }
                },
                Ok(Message::Close(_)) | Err(_) => break,
                // Audio travels as JSON text frames; binary is unexpected.
                Ok(Message::Binary(_)) => {
                    debug!("unexpected binary frame, ignoring");
                }
                Ok(_) => {}
            }
        }
        // inbound_tx drops here; the runtime sees the channel end and runs
        // its cleanup path.
    });

    // First finisher decides the teardown order.
    tokio::select! {
        _ = &mut ingest => {
            // Socket gone: give the runtime a bounded window to clean up.
            let _ = tokio::time::timeout(
                std::time::Duration::from_secs(10),
                &mut runtime_task,
            )
            .await;
        }
        _ = &mut runtime_task => {
            // close_session: stop reading further frames.
            ingest.abort();
        }
        _ = &mut keepalive => {
            ingest.abort();
            let _ = tokio::time::timeout(
                std::time::Duration::from_secs(10),
                &mut runtime_task,
            )
            .await;
        }
    }

    keepalive.abort();
    ingest.abort();
    runtime_task.abort();
    let _ = pump.await;
    drop(writer_tx);
    let _ = writer.await;

    info!(customer = %claims.sub, "websocket session closed");
}

/// Fold the transport-level mode into the request.
fn apply_mode(mut request: ChatRequest, mode: Option<&str>) -> ChatRequest {
    match mode {
        Some("realtime") => request.request_type = RequestType::Realtime,
        Some("proactive") => request.settings.general.notification = true,
        _ => {}
    }
    request
}

async fn send_event(writer: &mpsc::Sender<String>, event: &Event) {
    match event.to_json() {
        Ok(json) => {
            let _ = writer.send(json).await;
        }
        Err(err) => warn!(error = %err, "event serialization failed"),
    }
}
