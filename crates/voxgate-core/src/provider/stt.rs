//! STT provider port.

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::ProviderError;

/// Streamed transcription output.
pub type TranscriptStream = BoxStream<'static, Result<TranscriptSegment, ProviderError>>;

/// One transcript segment. The last segment of a stream has
/// `is_final = true` and carries the complete transcript; this is the
/// finalization step of the transcription session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    pub is_final: bool,
}

/// Streaming speech-to-text.
#[async_trait]
pub trait SttProvider: Send + Sync {
    /// Transcribe audio frames as they arrive. The channel closing marks
    /// end of input; the adapter then finalizes and emits the terminal
    /// `is_final` segment.
    async fn transcribe(
        &self,
        audio: mpsc::Receiver<Bytes>,
    ) -> Result<TranscriptStream, ProviderError>;
}
