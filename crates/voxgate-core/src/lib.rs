//! # voxgate-core
//!
//! Streaming chat gateway core: the event envelope, the multi-consumer
//! bus with completion-token discipline, provider ports and registries,
//! the parallel TTS orchestrator, the workflow dispatcher, and the
//! per-connection session runtime.
//!
//! Transport adapters (WebSocket/SSE/HTTP) live in `voxgate-axum`; the
//! SQLite session store lives in `voxgate-db`. This crate holds everything
//! transport- and storage-agnostic.

#![deny(unused_crate_dependencies)]

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod provider;
pub mod request;
pub mod runtime;
pub mod store;
pub mod tts;
pub mod workflow;

// Re-export commonly used types for convenience
pub use bus::{
    CompletionOwnershipError, CompletionToken, ConsumerId, DEFAULT_QUEUE_CAPACITY, EventReceiver,
    SendMode, StreamBus, TtsSignal,
};
pub use config::TimeoutConfig;
pub use error::{GatewayError, Stage};
pub use event::{Event, EventPayload, sanitize};
pub use provider::{
    BlobStorage, ModelConfig, ModelRegistry, ProviderError, ProviderRegistry, RealtimeProvider,
    SttProvider, TextCapabilities, TextProvider, TtsProvider,
};
pub use request::{ChatRequest, Prompt, PromptPart, RequestType, Settings};
pub use runtime::{ClientMessage, SessionRuntime};
pub use store::{MessageRole, NewStoredMessage, SessionStore, StoreError, StoredMessage};
pub use workflow::{AudioIngest, WorkflowChannels, WorkflowDeps};

// Silence unused dev-dependency warnings until more mock-based tests land
#[cfg(test)]
use mockall as _;
#[cfg(test)]
use tempfile as _;
#[cfg(test)]
use tokio_test as _;
