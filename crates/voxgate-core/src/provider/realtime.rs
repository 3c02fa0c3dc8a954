//! Realtime (bidirectional voice) provider port.
//!
//! The duplex audio transport is provider-specific; what the gateway fans
//! out to the client is the event shape below, wrapped in the standard
//! envelope (`turn.*` markers travel as `custom_event`).

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::stream::BoxStream;

use super::ProviderError;
use crate::request::RealtimeSettings;

/// Streamed provider events for one session.
pub type RealtimeStream = BoxStream<'static, Result<RealtimeEvent, ProviderError>>;

/// Events surfaced by a realtime session.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// The model started a response turn.
    TurnStarted,
    /// Text delta within the current turn.
    TurnText(String),
    /// Audio frame within the current turn.
    TurnAudio(Bytes),
    /// The current turn finished.
    TurnCompleted,
    /// Transcription of the user's audio input.
    InputTranscription { text: String, is_final: bool },
    /// The provider closed the session.
    SessionClosed,
}

/// An open bidirectional voice session.
///
/// The event stream is taken out once so callers can pump it concurrently
/// with the sending half.
#[async_trait]
pub trait RealtimeSession: Send + Sync {
    /// Append an audio frame to the input buffer.
    async fn send_audio(&self, frame: Bytes) -> Result<(), ProviderError>;

    /// Commit buffered input and request a response turn.
    async fn commit_input(&self) -> Result<(), ProviderError>;

    /// Take the server-event stream. Subsequent calls return an empty
    /// stream; the stream ends after `SessionClosed`.
    fn take_events(&mut self) -> RealtimeStream;

    /// Close the session.
    async fn close(&self) -> Result<(), ProviderError>;
}

/// Realtime session factory.
#[async_trait]
pub trait RealtimeProvider: Send + Sync {
    async fn open(
        &self,
        settings: RealtimeSettings,
    ) -> Result<Box<dyn RealtimeSession>, ProviderError>;
}
