//! Per-connection session runtime.
//!
//! The runtime supervises one connection: it races the inbound message
//! stream against the active workflow task so control messages (`cancel`,
//! `ping`, audio frames) preempt in-flight generation. A blocking receive
//! would make sub-second cancel acknowledgment impossible; the
//! first-completed race is the point of this module.
//!
//! Transports (the WebSocket endpoint) decode frames into
//! [`ClientMessage`]s and feed them through a channel; events flow back
//! through a single outbound channel, one stream per connection, pumped out
//! of each request's bus by a per-request task.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::StreamBus;
use crate::error::GatewayError;
use crate::event::Event;
use crate::provider::ToolOutcome;
use crate::request::ChatRequest;
use crate::workflow::{self, AudioIngest, WorkflowChannels, WorkflowDeps};

/// Capacity of the audio ingest queue (frames, not bytes).
const AUDIO_QUEUE_CAPACITY: usize = 256;

/// Decoded client→server message.
#[derive(Debug)]
pub enum ClientMessage {
    /// A new chat request (the initial payload, or a follow-up once the
    /// previous workflow finished).
    Request(Box<ChatRequest>),
    Cancel,
    Ping,
    Pong,
    /// One base64-decoded PCM frame.
    AudioFrame(Bytes),
    RecordingFinished,
    /// Tool results resuming a paused text stream.
    ToolResults(Vec<ToolOutcome>),
    CloseSession,
}

impl ClientMessage {
    /// Parse one inbound JSON text frame.
    ///
    /// Control messages carry a `type` tag; anything without one is
    /// treated as a chat request (strict schema).
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| GatewayError::Validation(format!("malformed message: {e}")))?;

        match value.get("type").and_then(|t| t.as_str()) {
            Some("cancel") => Ok(Self::Cancel),
            Some("ping") => Ok(Self::Ping),
            Some("pong") => Ok(Self::Pong),
            Some("audio") => {
                let encoded = value
                    .get("audio")
                    .and_then(|a| a.as_str())
                    .ok_or_else(|| {
                        GatewayError::Validation("audio message missing 'audio' field".into())
                    })?;
                let decoded = BASE64.decode(encoded).map_err(|e| {
                    GatewayError::Validation(format!("audio field is not valid base64: {e}"))
                })?;
                Ok(Self::AudioFrame(Bytes::from(decoded)))
            }
            Some("RecordingFinished") => Ok(Self::RecordingFinished),
            Some("tool_results") => {
                let results = value.get("results").cloned().ok_or_else(|| {
                    GatewayError::Validation("tool_results message missing 'results'".into())
                })?;
                let results: Vec<ToolOutcome> = serde_json::from_value(results).map_err(|e| {
                    GatewayError::Validation(format!("malformed tool results: {e}"))
                })?;
                Ok(Self::ToolResults(results))
            }
            Some("close_session") => Ok(Self::CloseSession),
            Some(other) => Err(GatewayError::Validation(format!(
                "unknown message type: {other}"
            ))),
            None => {
                let request: ChatRequest = serde_json::from_value(value)
                    .map_err(|e| GatewayError::Validation(format!("malformed request: {e}")))?;
                Ok(Self::Request(Box::new(request)))
            }
        }
    }
}

/// The per-request state the runtime supervises.
struct ActiveWorkflow {
    bus: Arc<StreamBus>,
    cancel: CancellationToken,
    audio_tx: mpsc::Sender<AudioIngest>,
    tool_tx: mpsc::Sender<Vec<ToolOutcome>>,
    handle: JoinHandle<()>,
    /// Drains the request's consumer queue into the connection's outbound
    /// channel; ends when the bus delivers its sentinel.
    pump: JoinHandle<()>,
}

/// What the select decided, extracted so state mutation happens with no
/// borrows held.
enum Step {
    Inbound(Option<ClientMessage>),
    WorkflowDone,
}

/// Per-connection supervisor. One instance per accepted socket.
pub struct SessionRuntime {
    deps: Arc<WorkflowDeps>,
    customer_id: String,
    queue_capacity: usize,
}

impl SessionRuntime {
    pub fn new(deps: Arc<WorkflowDeps>, customer_id: String, queue_capacity: usize) -> Self {
        Self {
            deps,
            customer_id,
            queue_capacity,
        }
    }

    /// Supervise the connection until the transport closes, the client
    /// sends `close_session`, or the inbound channel ends.
    ///
    /// `initial` is the first request, already parsed by the endpoint.
    pub async fn run(
        &self,
        mut inbound: mpsc::Receiver<ClientMessage>,
        outbound: mpsc::Sender<Event>,
        initial: ChatRequest,
    ) {
        let mut active = Some(self.start_workflow(initial, &outbound));

        loop {
            let step = if let Some(workflow) = active.as_mut() {
                tokio::select! {
                    message = inbound.recv() => Step::Inbound(message),
                    _ = &mut workflow.handle => Step::WorkflowDone,
                }
            } else {
                Step::Inbound(inbound.recv().await)
            };

            match step {
                Step::WorkflowDone => {
                    if let Some(workflow) = active.take() {
                        // Let the pump flush the sentinel-terminated queue
                        // before accepting the next request.
                        let _ = workflow.pump.await;
                    }
                }
                Step::Inbound(None) => break,
                Step::Inbound(Some(message)) => {
                    if self.handle_message(message, &mut active, &outbound).await {
                        break;
                    }
                }
            }
        }

        self.shutdown(active).await;
    }

    /// Returns `true` when the session loop should exit.
    async fn handle_message(
        &self,
        message: ClientMessage,
        active: &mut Option<ActiveWorkflow>,
        outbound: &mpsc::Sender<Event>,
    ) -> bool {
        match message {
            ClientMessage::Cancel => {
                if let Some(workflow) = active.as_ref() {
                    // Purge queued output first so the next event the
                    // client observes is `cancelled`, then trip the
                    // level-triggered flag every suspend point polls.
                    workflow.bus.quiesce();
                    workflow.cancel.cancel();
                    workflow
                        .bus
                        .send(Event::cancelled().stamped(), crate::bus::SendMode::All)
                        .await;
                } else {
                    let _ = outbound.send(Event::cancelled().stamped()).await;
                }
            }
            ClientMessage::Ping => {
                let _ = outbound.send(Event::pong()).await;
            }
            // Keepalive acks are consumed by the transport; tolerate one
            // slipping through.
            ClientMessage::Pong => {}
            ClientMessage::AudioFrame(frame) => {
                if let Some(workflow) = active.as_ref() {
                    if workflow
                        .audio_tx
                        .try_send(AudioIngest::Frame(frame))
                        .is_err()
                    {
                        warn!("audio ingest queue full or closed, dropping frame");
                    }
                } else {
                    debug!("audio frame with no active workflow, dropping");
                }
            }
            ClientMessage::RecordingFinished => {
                if let Some(workflow) = active.as_ref() {
                    if workflow.audio_tx.try_send(AudioIngest::End).is_err() {
                        warn!("audio ingest queue closed before RecordingFinished");
                    }
                }
            }
            ClientMessage::ToolResults(results) => {
                if let Some(workflow) = active.as_ref() {
                    if workflow.tool_tx.try_send(results).is_err() {
                        warn!("tool results with no pending tool pause, dropping");
                    }
                } else {
                    debug!("tool results with no active workflow, dropping");
                }
            }
            ClientMessage::Request(request) => {
                if active.is_some() {
                    // WR1: one workflow per runtime. Starting another
                    // before cancelling the current one is a client error.
                    let _ = outbound
                        .send(
                            Event::error(
                                "a workflow is already active; cancel it first",
                                "validation",
                            )
                            .stamped(),
                        )
                        .await;
                } else {
                    *active = Some(self.start_workflow(*request, outbound));
                }
            }
            ClientMessage::CloseSession => return true,
        }
        false
    }

    fn start_workflow(
        &self,
        request: ChatRequest,
        outbound: &mpsc::Sender<Event>,
    ) -> ActiveWorkflow {
        let (bus, token) = StreamBus::new(self.queue_capacity);
        let (_consumer_id, mut receiver) = bus.register_consumer();

        let outbound = outbound.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if outbound.send(event).await.is_err() {
                    break;
                }
            }
        });

        let cancel = CancellationToken::new();
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_QUEUE_CAPACITY);
        let (tool_tx, tool_rx) = mpsc::channel(4);

        let channels = WorkflowChannels {
            cancel: cancel.clone(),
            audio_rx,
            tool_rx,
        };
        let handle = tokio::spawn(workflow::run(
            Arc::clone(&self.deps),
            Arc::clone(&bus),
            token,
            request,
            self.customer_id.clone(),
            channels,
        ));

        ActiveWorkflow {
            bus,
            cancel,
            audio_tx,
            tool_tx,
            handle,
            pump,
        }
    }

    /// Cleanup obligations for any exit path: cancel the workflow, give it
    /// a bounded window to run its own cleanup (terminals + sentinel),
    /// then abort whatever is left.
    async fn shutdown(&self, active: Option<ActiveWorkflow>) {
        let Some(workflow) = active else { return };
        info!("session closing with an active workflow; cancelling");
        workflow.cancel.cancel();

        let grace = tokio::time::Duration::from_secs(5);
        let handle = workflow.handle;
        if tokio::time::timeout(grace, handle).await.is_err() {
            warn!("workflow did not stop within grace period");
        }
        // The bus drop/closure delivers the sentinel; the pump ends with it.
        drop(workflow.bus);
        let _ = tokio::time::timeout(grace, workflow.pump).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_control_messages() {
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"cancel"}"#).unwrap(),
            ClientMessage::Cancel
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"RecordingFinished"}"#).unwrap(),
            ClientMessage::RecordingFinished
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"close_session"}"#).unwrap(),
            ClientMessage::CloseSession
        ));
    }

    #[test]
    fn parses_audio_frames() {
        let raw = r#"{"type":"audio","audio":"cGNt"}"#;
        match ClientMessage::parse(raw).unwrap() {
            ClientMessage::AudioFrame(frame) => assert_eq!(&frame[..], b"pcm"),
            other => panic!("unexpected message: {other:?}"),
        }

        assert!(ClientMessage::parse(r#"{"type":"audio"}"#).is_err());
        assert!(ClientMessage::parse(r#"{"type":"audio","audio":"_not b64_"}"#).is_err());
    }

    #[test]
    fn untyped_payloads_parse_as_requests() {
        let raw = r#"{"request_type":"text","prompt":"hello"}"#;
        match ClientMessage::parse(raw).unwrap() {
            ClientMessage::Request(request) => {
                assert_eq!(request.request_type.as_str(), "text");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_a_validation_error() {
        let err = ClientMessage::parse(r#"{"type":"reboot"}"#).unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[test]
    fn parses_tool_results() {
        let raw = r#"{"type":"tool_results","results":[
            {"call_id":"c1","name":"search","result":{"hits":3}}
        ]}"#;
        match ClientMessage::parse(raw).unwrap() {
            ClientMessage::ToolResults(results) => {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].name, "search");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
