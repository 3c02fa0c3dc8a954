//! Inbound request model.
//!
//! The initial WebSocket payload and the HTTP chat bodies share this shape.
//! Unknown top-level keys are rejected (strict schema); unknown keys inside
//! `settings` sections are ignored so clients can send newer fields without
//! breaking older gateways.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

/// Workflow selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// Stream text from an LLM, optionally teeing into TTS.
    Text,
    /// Ingest audio frames, transcribe, then run the text workflow.
    Audio,
    /// Forward audio frames directly to a multimodal text provider.
    AudioDirect,
    /// Skip text generation; synthesize the supplied prompt.
    Tts,
    /// Bidirectional voice session.
    Realtime,
}

impl RequestType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
            Self::AudioDirect => "audio_direct",
            Self::Tts => "tts",
            Self::Realtime => "realtime",
        }
    }
}

/// A prompt: either a plain string or an ordered list of content parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prompt {
    Text(String),
    Parts(Vec<PromptPart>),
}

/// One element of a structured prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptPart {
    Text { text: String },
    ImageUrl { image_url: String },
    FileUrl { file_url: String },
}

impl Prompt {
    /// Concatenated text content, in part order.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => {
                let mut out = String::new();
                for part in parts {
                    if let PromptPart::Text { text } = part {
                        if !out.is_empty() {
                            out.push('\n');
                        }
                        out.push_str(text);
                    }
                }
                out
            }
        }
    }

    /// URLs of referenced attachments (images and files), in part order.
    pub fn attachments(&self) -> Vec<String> {
        match self {
            Self::Text(_) => Vec::new(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    PromptPart::ImageUrl { image_url } => Some(image_url.clone()),
                    PromptPart::FileUrl { file_url } => Some(file_url.clone()),
                    PromptPart::Text { .. } => None,
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Parts(parts) => parts.iter().all(|part| match part {
                PromptPart::Text { text } => text.trim().is_empty(),
                _ => false,
            }),
        }
    }
}

/// One chat request as submitted by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatRequest {
    pub request_type: RequestType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<Prompt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub settings: Settings,
}

impl ChatRequest {
    /// Schema checks beyond what serde enforces.
    ///
    /// Rejected requests create no session and emit a single
    /// `error(stage = "validation")`.
    pub fn validate(&self) -> Result<(), GatewayError> {
        match self.request_type {
            RequestType::Text | RequestType::Tts => {
                let missing = self.prompt.as_ref().is_none_or(Prompt::is_empty);
                if missing {
                    return Err(GatewayError::Validation(format!(
                        "request_type '{}' requires a non-empty prompt",
                        self.request_type.as_str()
                    )));
                }
            }
            RequestType::Audio | RequestType::AudioDirect | RequestType::Realtime => {}
        }
        Ok(())
    }
}

// ── Settings sections ────────────────────────────────────────────────────────

/// Nested settings. Every section is optional; unknown keys inside a
/// section are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub text: TextSettings,
    #[serde(default)]
    pub audio: AudioSettings,
    #[serde(default)]
    pub tts: TtsSettings,
    #[serde(default)]
    pub image: MediaSettings,
    #[serde(default)]
    pub video: MediaSettings,
    #[serde(default)]
    pub realtime: RealtimeSettings,
    #[serde(default)]
    pub general: GeneralSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextSettings {
    /// Model alias resolved through the model registry.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// `false` forces a buffered (non-streaming) provider call.
    #[serde(default)]
    pub streaming: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioSettings {
    /// STT provider key.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TtsSettings {
    /// Master switch for the parallel TTS pipeline.
    #[serde(default)]
    pub tts_auto_execute: bool,
    /// `false` disables parallel synthesis even when auto-execute is on.
    #[serde(default)]
    pub streaming: Option<bool>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    /// Whether the synthesized audio should be persisted to blob storage.
    /// Defaults to persisting whenever storage is configured.
    #[serde(default)]
    pub persist: Option<bool>,
}

impl TtsSettings {
    /// Parallel TTS is enabled iff auto-execute is on and streaming was not
    /// explicitly disabled.
    pub fn parallel_enabled(&self) -> bool {
        self.tts_auto_execute && self.streaming != Some(false)
    }
}

/// Image/video sections are accepted for schema compatibility; the
/// synchronous media endpoints live outside the streaming core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaSettings {
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimeSettings {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Best-effort session tag for proactive/deep-research flows.
    #[serde(default)]
    pub notification: bool,
    /// Opaque metadata attached to persisted messages.
    #[serde(default)]
    pub metadata: Option<Value>,
}
