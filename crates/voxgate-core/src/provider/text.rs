//! Text (LLM) provider port.

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::ProviderError;
use crate::request::{Prompt, TextSettings};
use crate::store::StoredMessage;

/// Streamed provider output.
pub type TextStream = BoxStream<'static, Result<TextEvent, ProviderError>>;

/// One element of a text generation stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TextEvent {
    /// A text delta.
    Delta(String),
    /// A reasoning delta, for providers with a thinking channel.
    Thinking(String),
    /// The provider paused: the client must run a tool and submit results
    /// before generation resumes.
    ToolCall(ToolInvocation),
    /// Generation finished normally.
    Done,
}

/// A provider-requested tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

/// A client-submitted tool result, fed back on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    pub result: Value,
}

/// Wire dialect of the vendor API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiStyle {
    /// `/chat/completions`-like request/response shape.
    ChatCompletions,
    /// `/responses`-like shape with typed output items.
    Responses,
}

/// Static capability record, declared per adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextCapabilities {
    pub supports_streaming: bool,
    pub supports_reasoning: bool,
    pub supports_image_input: bool,
    pub supports_audio_input: bool,
    pub api_style: ApiStyle,
}

impl Default for TextCapabilities {
    fn default() -> Self {
        Self {
            supports_streaming: true,
            supports_reasoning: false,
            supports_image_input: false,
            supports_audio_input: false,
            api_style: ApiStyle::ChatCompletions,
        }
    }
}

/// One generation call.
#[derive(Debug, Clone)]
pub struct TextRequest {
    /// Vendor-side model name (already resolved from the alias).
    pub model: String,
    pub prompt: Prompt,
    /// Prior session messages, oldest first.
    pub history: Vec<StoredMessage>,
    pub settings: TextSettings,
    /// Non-empty on resume after a tool pause.
    pub tool_results: Vec<ToolOutcome>,
}

/// Streaming text generation.
///
/// Resume-after-tool is expressed as a second `stream` call carrying the
/// accumulated `tool_results`; adapters fold them into vendor messages.
#[async_trait]
pub trait TextProvider: Send + Sync {
    fn capabilities(&self) -> TextCapabilities;

    async fn stream(&self, request: TextRequest) -> Result<TextStream, ProviderError>;

    /// Direct audio-input generation, for multimodal models. Gated by
    /// `capabilities().supports_audio_input`.
    async fn stream_audio(
        &self,
        _frames: mpsc::Receiver<Bytes>,
        _request: TextRequest,
    ) -> Result<TextStream, ProviderError> {
        Err(ProviderError::Unsupported("audio input"))
    }
}
