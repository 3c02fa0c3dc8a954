//! TTS provider port.

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::ProviderError;
use crate::bus::TtsSignal;

/// Streamed audio frames.
pub type AudioStream = BoxStream<'static, Result<Bytes, ProviderError>>;

/// Synthesis parameters for one request.
#[derive(Debug, Clone, Default)]
pub struct TtsOptions {
    pub voice: Option<String>,
    pub model: Option<String>,
    pub speed: Option<f32>,
}

/// Container format of the frames an adapter emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Pcm16,
    Mp3,
    OggOpus,
}

impl AudioFormat {
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Pcm16 => "audio/pcm",
            Self::Mp3 => "audio/mpeg",
            Self::OggOpus => "audio/ogg",
        }
    }
}

/// Static capability record, declared per adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsCapabilities {
    /// Whether the adapter can consume text incrementally over a duplex
    /// connection. Without it the orchestrator falls back to buffered
    /// synthesis after the full text is known.
    pub supports_input_stream: bool,
    pub audio_format: AudioFormat,
    pub voices: Vec<String>,
}

impl Default for TtsCapabilities {
    fn default() -> Self {
        Self {
            supports_input_stream: false,
            audio_format: AudioFormat::Pcm16,
            voices: Vec::new(),
        }
    }
}

/// An open duplex synthesis connection.
///
/// The orchestrator runs the send loop (forwarding [`TtsSignal`]s from the
/// bus side-channel into `input`) and the receive loop (draining `audio`)
/// concurrently. Sending [`TtsSignal::Eos`] is the provider's end-of-input
/// token; the `audio` stream ends after the final frame.
pub struct DuplexTtsSession {
    pub input: mpsc::Sender<TtsSignal>,
    pub audio: AudioStream,
}

/// Speech synthesis.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    fn capabilities(&self) -> TtsCapabilities;

    /// Whole-text synthesis. Mandatory for every adapter.
    async fn stream_buffered(
        &self,
        text: String,
        options: TtsOptions,
    ) -> Result<AudioStream, ProviderError>;

    /// Open a duplex connection for incremental input. Gated by
    /// `capabilities().supports_input_stream`.
    async fn open_duplex(
        &self,
        _options: TtsOptions,
    ) -> Result<DuplexTtsSession, ProviderError> {
        Err(ProviderError::Unsupported("duplex input stream"))
    }
}
