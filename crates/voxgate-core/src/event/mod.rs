//! Canonical event union for everything the gateway streams to clients.
//!
//! This module is the single source of truth for events used by the
//! WebSocket, SSE, and HTTP transports as well as the in-process bus.
//!
//! # Wire Format
//!
//! Events are serialized with a snake_case `type` tag; optional correlation
//! fields (`session_id`, `stage`, `timestamp`, `provider`, `model`) sit next
//! to the payload at the top level:
//!
//! ```json
//! { "type": "text_chunk", "content": "Hi", "session_id": "6d1f…" }
//! ```
//!
//! There is no camelCase mirroring; every discriminant and key is snake_case.

mod sanitize;

pub use sanitize::{MAX_SANITIZE_DEPTH, sanitize};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Serialization failure for an event.
///
/// The payload enum is closed, so the only way to get here is a
/// `serde_json` failure on a `custom_event` payload that slipped past the
/// sanitizer.
#[derive(Debug, Error)]
#[error("event serialization failed: {0}")]
pub struct EventError(#[from] serde_json::Error);

/// A single gateway event: tagged payload plus optional correlation fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    #[serde(flatten)]
    pub payload: EventPayload,

    /// Session this event belongs to, once one is bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Originating subsystem for `error` events (`"validation"`, `"tts"`, …).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// RFC 3339 emission time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Provider key that produced the event, where one applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Model alias that produced the event, where one applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Tagged event payloads. Discriminants are the wire contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Handshake acknowledgment. Sent once on accept (version only) and
    /// again when a session is bound (with `session_id` on the envelope).
    WebsocketReady { version: String },

    /// The workflow has been accepted and generation is starting.
    Working,

    /// A text delta from the text provider.
    TextChunk { content: String },

    /// A reasoning delta, for providers that expose a thinking channel.
    ThinkingChunk { content: String },

    /// The provider paused for a client-side tool invocation.
    ToolStart { name: String, arguments: Value },

    /// Tool results were submitted and generation is resuming.
    ToolResult { name: String, result: Value },

    /// Text generation finished. One of the two text-side terminals.
    TextCompleted,

    /// This workflow produces no text. The other text-side terminal.
    TextNotRequested,

    /// TTS synthesis began.
    TtsStarted {
        #[serde(skip_serializing_if = "Option::is_none")]
        voice: Option<String>,
    },

    /// A base64-encoded audio frame.
    AudioChunk { audio: String },

    /// All audio frames have been produced.
    TtsGenerationCompleted { audio_chunks: u64, text_chunks: u64 },

    /// TTS pipeline fully finished. One of the two TTS-side terminals.
    TtsCompleted,

    /// This workflow produces no audio. The other TTS-side terminal.
    TtsNotRequested,

    /// Persisted audio artifact is available at `url`.
    TtsFileUploaded { url: String },

    /// A partial transcript from the STT provider.
    Transcription { text: String, is_final: bool },

    /// The full transcript after finalization.
    TranscriptionComplete { text: String },

    /// A session-store write finished (success or not).
    DbOperationExecuted { success: bool },

    /// Client-initiated cancellation was honored.
    Cancelled,

    /// Something went wrong; `stage` on the envelope names the subsystem.
    Error { message: String },

    /// Keepalive probe.
    Ping,

    /// Keepalive response.
    Pong,

    /// The server is closing the connection.
    Closing { reason: String },

    /// Extensibility envelope for sub-typed events the core treats as
    /// opaque. `data` passes through the sanitizer before serialization.
    CustomEvent { event_type: String, data: Value },
}

impl Event {
    fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            session_id: None,
            stage: None,
            timestamp: None,
            provider: None,
            model: None,
        }
    }

    pub fn websocket_ready(version: &str) -> Self {
        Self::new(EventPayload::WebsocketReady {
            version: version.to_string(),
        })
    }

    pub fn working() -> Self {
        Self::new(EventPayload::Working)
    }

    pub fn text_chunk(content: impl Into<String>) -> Self {
        Self::new(EventPayload::TextChunk {
            content: content.into(),
        })
    }

    pub fn thinking_chunk(content: impl Into<String>) -> Self {
        Self::new(EventPayload::ThinkingChunk {
            content: content.into(),
        })
    }

    pub fn tool_start(name: impl Into<String>, arguments: Value) -> Self {
        Self::new(EventPayload::ToolStart {
            name: name.into(),
            arguments: sanitize(&arguments),
        })
    }

    pub fn tool_result(name: impl Into<String>, result: Value) -> Self {
        Self::new(EventPayload::ToolResult {
            name: name.into(),
            result: sanitize(&result),
        })
    }

    pub fn text_completed() -> Self {
        Self::new(EventPayload::TextCompleted)
    }

    pub fn text_not_requested() -> Self {
        Self::new(EventPayload::TextNotRequested)
    }

    pub fn tts_started(voice: Option<String>) -> Self {
        Self::new(EventPayload::TtsStarted { voice })
    }

    /// Wrap a raw audio frame; the payload carries base64.
    pub fn audio_chunk(frame: &[u8]) -> Self {
        use base64::{Engine as _, engine::general_purpose::STANDARD};
        Self::new(EventPayload::AudioChunk {
            audio: STANDARD.encode(frame),
        })
    }

    pub fn tts_generation_completed(audio_chunks: u64, text_chunks: u64) -> Self {
        Self::new(EventPayload::TtsGenerationCompleted {
            audio_chunks,
            text_chunks,
        })
    }

    pub fn tts_completed() -> Self {
        Self::new(EventPayload::TtsCompleted)
    }

    pub fn tts_not_requested() -> Self {
        Self::new(EventPayload::TtsNotRequested)
    }

    pub fn tts_file_uploaded(url: impl Into<String>) -> Self {
        Self::new(EventPayload::TtsFileUploaded { url: url.into() })
    }

    pub fn transcription(text: impl Into<String>, is_final: bool) -> Self {
        Self::new(EventPayload::Transcription {
            text: text.into(),
            is_final,
        })
    }

    pub fn transcription_complete(text: impl Into<String>) -> Self {
        Self::new(EventPayload::TranscriptionComplete { text: text.into() })
    }

    pub fn db_operation_executed(success: bool) -> Self {
        Self::new(EventPayload::DbOperationExecuted { success })
    }

    pub fn cancelled() -> Self {
        Self::new(EventPayload::Cancelled)
    }

    pub fn error(message: impl Into<String>, stage: &str) -> Self {
        Self::new(EventPayload::Error {
            message: message.into(),
        })
        .with_stage(stage)
    }

    pub fn ping() -> Self {
        Self::new(EventPayload::Ping)
    }

    pub fn pong() -> Self {
        Self::new(EventPayload::Pong)
    }

    pub fn closing(reason: impl Into<String>) -> Self {
        Self::new(EventPayload::Closing {
            reason: reason.into(),
        })
    }

    /// Opaque sub-typed event; `data` is sanitized on construction so that
    /// serialization later cannot fail on producer-supplied payloads.
    pub fn custom(event_type: impl Into<String>, data: Value) -> Self {
        Self::new(EventPayload::CustomEvent {
            event_type: event_type.into(),
            data: sanitize(&data),
        })
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Stamp the envelope with the current UTC time (RFC 3339).
    #[must_use]
    pub fn stamped(mut self) -> Self {
        self.timestamp = Some(Utc::now().to_rfc3339());
        self
    }

    /// Wire discriminant, for logging and delivery bookkeeping.
    pub const fn event_name(&self) -> &'static str {
        match self.payload {
            EventPayload::WebsocketReady { .. } => "websocket_ready",
            EventPayload::Working => "working",
            EventPayload::TextChunk { .. } => "text_chunk",
            EventPayload::ThinkingChunk { .. } => "thinking_chunk",
            EventPayload::ToolStart { .. } => "tool_start",
            EventPayload::ToolResult { .. } => "tool_result",
            EventPayload::TextCompleted => "text_completed",
            EventPayload::TextNotRequested => "text_not_requested",
            EventPayload::TtsStarted { .. } => "tts_started",
            EventPayload::AudioChunk { .. } => "audio_chunk",
            EventPayload::TtsGenerationCompleted { .. } => "tts_generation_completed",
            EventPayload::TtsCompleted => "tts_completed",
            EventPayload::TtsNotRequested => "tts_not_requested",
            EventPayload::TtsFileUploaded { .. } => "tts_file_uploaded",
            EventPayload::Transcription { .. } => "transcription",
            EventPayload::TranscriptionComplete { .. } => "transcription_complete",
            EventPayload::DbOperationExecuted { .. } => "db_operation_executed",
            EventPayload::Cancelled => "cancelled",
            EventPayload::Error { .. } => "error",
            EventPayload::Ping => "ping",
            EventPayload::Pong => "pong",
            EventPayload::Closing { .. } => "closing",
            EventPayload::CustomEvent { .. } => "custom_event",
        }
    }

    /// Events the bus must deliver even when a consumer queue is full.
    ///
    /// Covers the dual-flag terminals plus `error` and `cancelled`; the
    /// `*_not_requested` terminals are included because the dual-completion
    /// contract cannot make progress without them.
    pub const fn is_guaranteed(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::TextCompleted
                | EventPayload::TextNotRequested
                | EventPayload::TtsCompleted
                | EventPayload::TtsNotRequested
                | EventPayload::Error { .. }
                | EventPayload::Cancelled
        )
    }

    /// Serialize to the UTF-8 JSON wire form.
    pub fn to_json(&self) -> Result<String, EventError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminants_are_snake_case() {
        let json = Event::text_chunk("Hi").to_json().unwrap();
        assert!(json.contains("\"type\":\"text_chunk\""));
        assert!(json.contains("\"content\":\"Hi\""));

        let json = Event::tts_generation_completed(4, 2).to_json().unwrap();
        assert!(json.contains("\"type\":\"tts_generation_completed\""));
        assert!(json.contains("\"audio_chunks\":4"));
    }

    #[test]
    fn correlation_fields_are_optional() {
        let bare = Event::working().to_json().unwrap();
        assert!(!bare.contains("session_id"));
        assert!(!bare.contains("timestamp"));

        let bound = Event::working().with_session_id("s1").to_json().unwrap();
        assert!(bound.contains("\"session_id\":\"s1\""));
    }

    #[test]
    fn error_event_carries_stage() {
        let json = Event::error("model missing", "validation").to_json().unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("\"stage\":\"validation\""));
    }

    #[test]
    fn audio_chunk_is_base64() {
        let ev = Event::audio_chunk(&[0u8, 255, 16]);
        let json = ev.to_json().unwrap();
        assert!(json.contains("\"audio\":\"AP8Q\""));
    }

    #[test]
    fn guaranteed_set_matches_dual_flag_terminals() {
        assert!(Event::text_completed().is_guaranteed());
        assert!(Event::text_not_requested().is_guaranteed());
        assert!(Event::tts_completed().is_guaranteed());
        assert!(Event::tts_not_requested().is_guaranteed());
        assert!(Event::cancelled().is_guaranteed());
        assert!(Event::error("x", "text").is_guaranteed());
        assert!(!Event::text_chunk("x").is_guaranteed());
        assert!(!Event::audio_chunk(b"x").is_guaranteed());
        assert!(!Event::tts_generation_completed(1, 1).is_guaranteed());
    }

    #[test]
    fn round_trips_through_serde() {
        let ev = Event::tool_start("search", serde_json::json!({"q": "rust"}))
            .with_session_id("s9");
        let json = ev.to_json().unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}
