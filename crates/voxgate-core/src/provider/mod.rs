//! Provider abstractions: capability-tagged interfaces for text, TTS, STT,
//! realtime, and blob storage, plus the registries that resolve them.
//!
//! # Design Rules
//!
//! - Traits here are the only surface the workflow layer sees; vendor
//!   adapters implement them out of tree.
//! - Capabilities are data, not downcasts: the dispatcher reads a
//!   capability record before choosing a code path (duplex vs. buffered
//!   TTS, tool-capable vs. plain text).
//! - Registries are populated once at boot and immutable afterwards.

mod loopback;
mod realtime;
mod registry;
mod storage;
mod stt;
mod text;
mod tts;

pub use loopback::{
    LoopbackRealtimeProvider, LoopbackSttProvider, LoopbackTextProvider, LoopbackTtsProvider,
};
pub use realtime::{RealtimeEvent, RealtimeProvider, RealtimeSession, RealtimeStream};
pub use registry::{ModelConfig, ModelRegistry, ProviderRegistry};
pub use storage::BlobStorage;
pub use stt::{SttProvider, TranscriptSegment, TranscriptStream};
pub use text::{
    ApiStyle, TextCapabilities, TextEvent, TextProvider, TextRequest, TextStream, ToolInvocation,
    ToolOutcome,
};
pub use tts::{
    AudioFormat, AudioStream, DuplexTtsSession, TtsCapabilities, TtsOptions, TtsProvider,
};

use thiserror::Error;

/// Failure inside a provider adapter.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Connection-level failure (dial, TLS, dropped stream).
    #[error("provider transport error: {0}")]
    Transport(String),

    /// The vendor answered with something we cannot interpret.
    #[error("provider protocol error: {0}")]
    Protocol(String),

    /// The vendor rejected the request (quota, safety, bad parameter).
    #[error("provider rejected request: {0}")]
    Rejected(String),

    /// The adapter does not implement this optional capability.
    #[error("operation not supported by provider: {0}")]
    Unsupported(&'static str),
}
