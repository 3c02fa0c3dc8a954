//! Core error types shared across the gateway.
//!
//! Every error kind maps to exactly one client-visible `stage` so transports
//! can surface failures uniformly. The propagation policy is recover-locally:
//! workflow tasks convert errors into `error` events, clean up, and complete
//! the stream via the completion token rather than letting the failure climb
//! through the session loop.

use thiserror::Error;

/// Top-level error union for the gateway core.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed request, unknown model, out-of-range parameter.
    /// Surfaced to the client with `stage = "validation"`; the connection
    /// remains open.
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid or expired credentials. One `error` event, then close.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Upstream vendor failure. `stage` names the originating pipeline.
    #[error("provider error in {stage}: {message}")]
    Provider { stage: Stage, message: String },

    /// Missing registration or credential. Fatal at startup, non-fatal at
    /// request time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Session store unavailable. Non-terminal; the workflow proceeds.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A suspension point exceeded its deadline. Takes the cancellation
    /// cleanup path but reports the originating subsystem.
    #[error("timeout in {stage} after {seconds}s")]
    Timeout { stage: Stage, seconds: u64 },

    /// Client-initiated cancellation, observed at a suspension point.
    #[error("cancelled")]
    Cancelled,

    /// Generation paused for a client tool action on a transport that
    /// cannot deliver tool results. Not a failure: the stream ends with
    /// the `tool_start` outstanding.
    #[error("tool action pending")]
    ToolActionPending,

    /// Anything that should not happen and has no recovery story.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// The `stage` string attached to the client-visible `error` event.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Authentication(_) => "authentication",
            Self::Provider { stage, .. } | Self::Timeout { stage, .. } => stage.as_str(),
            Self::Configuration(_) => "configuration",
            Self::Persistence(_) => "persistence",
            Self::Cancelled => "cancelled",
            Self::ToolActionPending => "text",
            Self::Internal(_) => "internal",
        }
    }
}

/// Originating subsystem for provider and timeout errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Text,
    Stt,
    Tts,
    Realtime,
    Storage,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Stt => "stt",
            Self::Tts => "tts",
            Self::Realtime => "realtime",
            Self::Storage => "storage",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
