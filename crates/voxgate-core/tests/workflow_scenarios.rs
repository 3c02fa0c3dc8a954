//! End-to-end workflow scenarios through the real dispatcher, bus, and
//! session runtime, using loopback providers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voxgate_core::bus::StreamBus;
use voxgate_core::event::{Event, EventPayload};
use voxgate_core::provider::{
    BlobStorage, LoopbackRealtimeProvider, LoopbackSttProvider, LoopbackTextProvider,
    LoopbackTtsProvider, ModelConfig, ModelRegistry, ProviderError, ProviderRegistry,
    TextCapabilities, TextEvent, TextProvider, TextRequest, TextStream, ToolInvocation,
};
use voxgate_core::request::ChatRequest;
use voxgate_core::runtime::{ClientMessage, SessionRuntime};
use voxgate_core::store::{NewStoredMessage, SessionStore, StoreError, StoredMessage};
use voxgate_core::workflow::{self, WorkflowChannels, WorkflowDeps};
use voxgate_core::{CompletionToken, TimeoutConfig};

// ── Test doubles ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryStore {
    sessions: Mutex<HashMap<String, String>>,
    messages: Mutex<Vec<StoredMessage>>,
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn ensure_session(
        &self,
        customer_id: &str,
        session_id: Option<&str>,
    ) -> Result<String, StoreError> {
        let id = session_id
            .filter(|id| !id.trim().is_empty())
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);
        self.sessions
            .lock()
            .unwrap()
            .insert(id.clone(), customer_id.to_string());
        Ok(id)
    }

    async fn append_message(
        &self,
        session_id: &str,
        message: NewStoredMessage,
    ) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.messages.lock().unwrap().push(StoredMessage {
            id: id.clone(),
            session_id: session_id.to_string(),
            role: message.role,
            content: message.content,
            attachments: message.attachments,
            created_at: chrono::Utc::now().to_rfc3339(),
        });
        Ok(id)
    }

    async fn session_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }
}

struct MemoryStorage;

#[async_trait]
impl BlobStorage for MemoryStorage {
    async fn put(
        &self,
        key: &str,
        _bytes: Bytes,
        _content_type: &str,
    ) -> Result<String, ProviderError> {
        Ok(format!("blob://{key}"))
    }
}

/// Text provider that sleeps between chunks so a cancel can land
/// mid-generation.
struct SlowText {
    chunks: Vec<&'static str>,
    delay: Duration,
}

#[async_trait]
impl TextProvider for SlowText {
    fn capabilities(&self) -> TextCapabilities {
        TextCapabilities::default()
    }

    async fn stream(&self, _request: TextRequest) -> Result<TextStream, ProviderError> {
        let chunks = self.chunks.clone();
        let delay = self.delay;
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for chunk in chunks {
                tokio::time::sleep(delay).await;
                if tx.send(Ok(TextEvent::Delta(chunk.to_string()))).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(Ok(TextEvent::Done)).await;
        });
        Ok(tokio_stream::wrappers::ReceiverStream::new(rx).boxed())
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct DepsBuilder {
    text: Arc<dyn TextProvider>,
    store: Option<Arc<dyn SessionStore>>,
    storage: bool,
}

impl DepsBuilder {
    fn new() -> Self {
        Self {
            text: Arc::new(LoopbackTextProvider::new()),
            store: Some(Arc::new(MemoryStore::default())),
            storage: true,
        }
    }

    fn text(mut self, provider: impl TextProvider + 'static) -> Self {
        self.text = Arc::new(provider);
        self
    }

    fn build(self) -> Arc<WorkflowDeps> {
        let mut providers = ProviderRegistry::new();
        providers.register_text("loopback", self.text).unwrap();
        providers
            .register_tts("loopback", Arc::new(LoopbackTtsProvider::streaming()))
            .unwrap();
        providers
            .register_tts(
                "loopback-buffered",
                Arc::new(LoopbackTtsProvider::buffered_only()),
            )
            .unwrap();
        providers
            .register_stt("loopback", Arc::new(LoopbackSttProvider))
            .unwrap();
        providers
            .register_realtime("loopback", Arc::new(LoopbackRealtimeProvider))
            .unwrap();
        if self.storage {
            providers.set_storage(Arc::new(MemoryStorage));
        }

        let mut models = ModelRegistry::new();
        models
            .register(ModelConfig {
                alias: "m1".into(),
                provider_key: "loopback".into(),
                model_name: "loopback-mini".into(),
                capabilities: TextCapabilities {
                    supports_audio_input: true,
                    ..TextCapabilities::default()
                },
                max_context_tokens: None,
                max_output_tokens: None,
            })
            .unwrap();

        Arc::new(WorkflowDeps {
            providers: Arc::new(providers),
            models: Arc::new(models),
            store: self.store,
            timeouts: TimeoutConfig::default(),
        })
    }
}

fn request(raw: &str) -> ChatRequest {
    serde_json::from_str(raw).expect("test request must parse")
}

/// Run a single request through the dispatcher and collect every event a
/// frontend consumer would observe.
async fn run_collect(deps: Arc<WorkflowDeps>, req: ChatRequest) -> Vec<Event> {
    let (bus, token) = StreamBus::with_defaults();
    let (_, mut rx) = bus.register_consumer();
    let channels = WorkflowChannels::detached(CancellationToken::new());
    let handle = tokio::spawn(workflow::run(
        deps,
        bus,
        token,
        req,
        "cust-test".into(),
        channels,
    ));

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    handle.await.unwrap();
    events
}

fn names(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(Event::event_name).collect()
}

fn position(events: &[Event], name: &str) -> usize {
    events
        .iter()
        .position(|e| e.event_name() == name)
        .unwrap_or_else(|| panic!("missing event {name}: {:?}", names(events)))
}

/// Assert the dual-completion property P1 over a drained stream.
fn assert_dual_completion(events: &[Event]) {
    let text_terminals = events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::TextCompleted | EventPayload::TextNotRequested))
        .count();
    let tts_terminals = events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::TtsCompleted | EventPayload::TtsNotRequested))
        .count();
    assert_eq!(text_terminals, 1, "P1 text side: {:?}", names(events));
    assert_eq!(tts_terminals, 1, "P1 tts side: {:?}", names(events));
}

// ── T1: text-only, no TTS ────────────────────────────────────────────────────

#[tokio::test]
async fn t1_text_only_without_tts() {
    let deps = DepsBuilder::new()
        .text(LoopbackTextProvider::with_scripts(vec![vec![
            TextEvent::Delta("Hi".into()),
            TextEvent::Delta(" there.".into()),
            TextEvent::Done,
        ]]))
        .build();

    let req = request(
        r#"{"request_type":"text","prompt":"Say hi",
            "settings":{"text":{"model":"m1"},"tts":{"tts_auto_execute":false}}}"#,
    );
    let events = run_collect(deps, req).await;

    // Session bind echo, then the working marker, then content.
    let ready = position(&events, "websocket_ready");
    assert!(events[ready].session_id.is_some(), "session echo carries id");
    assert!(ready < position(&events, "working"));

    let chunks: Vec<&str> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::TextChunk { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, vec!["Hi", " there."]);

    assert!(position(&events, "working") < position(&events, "text_chunk"));
    assert!(position(&events, "text_chunk") < position(&events, "text_completed"));
    assert!(position(&events, "text_completed") < position(&events, "tts_not_requested"));

    assert!(!names(&events).contains(&"audio_chunk"));
    assert!(!names(&events).contains(&"tts_started"));
    assert_dual_completion(&events);
}

// ── T2: text + streaming TTS ─────────────────────────────────────────────────

#[tokio::test]
async fn t2_text_with_streaming_tts() {
    let deps = DepsBuilder::new()
        .text(LoopbackTextProvider::with_scripts(vec![vec![
            TextEvent::Delta("Hi".into()),
            TextEvent::Delta(" there.".into()),
            TextEvent::Done,
        ]]))
        .build();

    let req = request(
        r#"{"request_type":"text","prompt":"Say hi",
            "settings":{"text":{"model":"m1"},
                        "tts":{"tts_auto_execute":true,"provider":"loopback","voice":"v"}}}"#,
    );
    let events = run_collect(deps, req).await;

    // P6 ordering within the TTS pipeline.
    let started = position(&events, "tts_started");
    let first_audio = position(&events, "audio_chunk");
    let generated = position(&events, "tts_generation_completed");
    let completed = position(&events, "tts_completed");
    let uploaded = position(&events, "tts_file_uploaded");
    assert!(started < first_audio);
    assert!(first_audio < generated);
    assert!(generated < completed);
    assert!(completed < uploaded);

    // P3 tee fidelity: one synthesized frame per non-whitespace chunk.
    let audio_count = names(&events).iter().filter(|n| **n == "audio_chunk").count();
    assert_eq!(audio_count, 2);

    match &events[uploaded].payload {
        EventPayload::TtsFileUploaded { url } => assert!(url.starts_with("blob://tts/")),
        other => panic!("unexpected payload {other:?}"),
    }

    // Counters match what streamed.
    match &events[generated].payload {
        EventPayload::TtsGenerationCompleted {
            audio_chunks,
            text_chunks,
        } => {
            assert_eq!(*audio_chunks, 2);
            assert_eq!(*text_chunks, 2);
        }
        other => panic!("unexpected payload {other:?}"),
    }

    assert_dual_completion(&events);
}

// ── T3: buffered fallback TTS ────────────────────────────────────────────────

#[tokio::test]
async fn t3_buffered_tts_runs_after_text_completes() {
    let deps = DepsBuilder::new()
        .text(LoopbackTextProvider::with_scripts(vec![vec![
            TextEvent::Delta("Hi".into()),
            TextEvent::Delta(" there.".into()),
            TextEvent::Done,
        ]]))
        .build();

    let req = request(
        r#"{"request_type":"text","prompt":"Say hi",
            "settings":{"text":{"model":"m1"},
                        "tts":{"tts_auto_execute":true,"provider":"loopback-buffered","voice":"v"}}}"#,
    );
    let events = run_collect(deps, req).await;

    let last_chunk = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.event_name() == "text_chunk")
        .map(|(i, _)| i)
        .max()
        .unwrap();
    let text_completed = position(&events, "text_completed");
    let started = position(&events, "tts_started");

    assert!(last_chunk < text_completed);
    assert!(text_completed < started, "buffered synthesis starts after EOS");
    assert!(started < position(&events, "audio_chunk"));
    assert!(position(&events, "tts_generation_completed") < position(&events, "tts_completed"));
    assert_dual_completion(&events);
}

// ── T4: cancel mid-generation ────────────────────────────────────────────────

#[tokio::test]
async fn t4_cancel_preempts_generation() {
    let deps = DepsBuilder::new()
        .text(SlowText {
            chunks: vec!["one ", "two ", "three ", "four ", "five "],
            delay: Duration::from_millis(50),
        })
        .build();

    let req = request(
        r#"{"request_type":"text","prompt":"count",
            "settings":{"text":{"model":"m1"},"tts":{"tts_auto_execute":false}}}"#,
    );

    let runtime = SessionRuntime::new(deps, "cust-test".into(), 128);
    let (inbound_tx, inbound_rx) = mpsc::channel(8);
    let (outbound_tx, mut outbound_rx) = mpsc::channel(64);
    let runtime_task = tokio::spawn(async move {
        runtime.run(inbound_rx, outbound_tx, req).await;
    });

    let mut observed = Vec::new();
    let mut chunks_seen = 0;
    while let Some(event) = outbound_rx.recv().await {
        let name = event.event_name();
        observed.push(event);
        if name == "text_chunk" {
            chunks_seen += 1;
            if chunks_seen == 2 {
                inbound_tx
                    .send(ClientMessage::parse(r#"{"type":"cancel"}"#).unwrap())
                    .await
                    .unwrap();
            }
        }
        if name == "tts_not_requested" || name == "tts_completed" {
            break;
        }
    }
    inbound_tx
        .send(ClientMessage::parse(r#"{"type":"close_session"}"#).unwrap())
        .await
        .unwrap();
    runtime_task.await.unwrap();

    // P5: after `cancelled`, no further content events.
    let cancelled = position(&observed, "cancelled");
    for event in &observed[cancelled + 1..] {
        assert!(
            !matches!(
                event.payload,
                EventPayload::TextChunk { .. } | EventPayload::AudioChunk { .. }
            ),
            "content after cancelled: {:?}",
            names(&observed)
        );
    }
    assert!(position(&observed, "text_not_requested") > cancelled);
    assert!(position(&observed, "tts_not_requested") > cancelled);
    assert_dual_completion(&observed);
}

// ── T5: tool-action pause ────────────────────────────────────────────────────

#[tokio::test]
async fn t5_tool_call_defers_text_completion() {
    let deps = DepsBuilder::new()
        .text(LoopbackTextProvider::with_scripts(vec![
            vec![
                TextEvent::Delta("Checking".into()),
                TextEvent::ToolCall(ToolInvocation {
                    call_id: "c1".into(),
                    name: "weather".into(),
                    arguments: serde_json::json!({"city": "Oslo"}),
                }),
            ],
            vec![TextEvent::Delta(" sunny.".into()), TextEvent::Done],
        ]))
        .build();

    let req = request(
        r#"{"request_type":"text","prompt":"weather?",
            "settings":{"text":{"model":"m1"},"tts":{"tts_auto_execute":false}}}"#,
    );

    let runtime = SessionRuntime::new(deps, "cust-test".into(), 128);
    let (inbound_tx, inbound_rx) = mpsc::channel(8);
    let (outbound_tx, mut outbound_rx) = mpsc::channel(64);
    let runtime_task = tokio::spawn(async move {
        runtime.run(inbound_rx, outbound_tx, req).await;
    });

    let mut observed = Vec::new();
    while let Some(event) = outbound_rx.recv().await {
        let name = event.event_name();
        observed.push(event);
        if name == "tool_start" {
            // No text_completed may exist while the tool pause is open.
            assert!(!names(&observed).contains(&"text_completed"));
            inbound_tx
                .send(
                    ClientMessage::parse(
                        r#"{"type":"tool_results","results":[
                            {"call_id":"c1","name":"weather","result":{"sky":"sunny"}}
                        ]}"#,
                    )
                    .unwrap(),
                )
                .await
                .unwrap();
        }
        if name == "tts_not_requested" {
            break;
        }
    }
    inbound_tx
        .send(ClientMessage::parse(r#"{"type":"close_session"}"#).unwrap())
        .await
        .unwrap();
    runtime_task.await.unwrap();

    let tool_start = position(&observed, "tool_start");
    let tool_result = position(&observed, "tool_result");
    let completed = position(&observed, "text_completed");
    assert!(tool_start < tool_result);
    assert!(tool_result < completed);

    let chunks: Vec<&str> = observed
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::TextChunk { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, vec!["Checking", " sunny."]);
    assert_dual_completion(&observed);
}

// ── T6: completion-token monopoly across components ──────────────────────────

#[tokio::test]
async fn t6_foreign_token_cannot_close_anothers_stream() {
    let (bus, token) = StreamBus::with_defaults();
    let (_, mut rx) = bus.register_consumer();

    // A second bus's token is exactly the "bogus token" a misbehaving
    // helper would hold.
    let (_other_bus, other_token) = StreamBus::with_defaults();

    assert!(bus.signal_completion(&other_token).await.is_err());
    assert!(!bus.is_closed());

    bus.send(Event::text_chunk("still streaming"), voxgate_core::SendMode::All)
        .await;
    bus.signal_completion(&token).await.unwrap();

    assert_eq!(rx.recv().await.unwrap().event_name(), "text_chunk");
    assert_eq!(rx.recv().await, None);
}

// ── TTS-only workflow ────────────────────────────────────────────────────────

#[tokio::test]
async fn tts_only_workflow_emits_no_frontend_text() {
    let deps = DepsBuilder::new().build();
    let req = request(
        r#"{"request_type":"tts","prompt":"Read this aloud",
            "settings":{"tts":{"tts_auto_execute":true,"provider":"loopback","voice":"aria"}}}"#,
    );
    let events = run_collect(deps, req).await;

    assert!(names(&events).contains(&"text_not_requested"));
    assert!(!names(&events).contains(&"text_chunk"), "{:?}", names(&events));
    assert!(position(&events, "tts_started") < position(&events, "audio_chunk"));
    assert!(position(&events, "audio_chunk") < position(&events, "tts_generation_completed"));
    assert_dual_completion(&events);
}

// ── Audio ingest workflow ────────────────────────────────────────────────────

#[tokio::test]
async fn audio_workflow_transcribes_then_generates() {
    let deps = DepsBuilder::new().build();
    let req = request(
        r#"{"request_type":"audio",
            "settings":{"audio":{"provider":"loopback"},
                        "text":{"model":"m1"},
                        "tts":{"tts_auto_execute":false}}}"#,
    );

    let runtime = SessionRuntime::new(deps, "cust-test".into(), 128);
    let (inbound_tx, inbound_rx) = mpsc::channel(8);
    let (outbound_tx, mut outbound_rx) = mpsc::channel(64);
    let runtime_task = tokio::spawn(async move {
        runtime.run(inbound_rx, outbound_tx, req).await;
    });

    for frame in ["turn on", "the lights"] {
        let encoded = {
            use base64::{Engine as _, engine::general_purpose::STANDARD};
            STANDARD.encode(frame.as_bytes())
        };
        inbound_tx
            .send(ClientMessage::parse(&format!(r#"{{"type":"audio","audio":"{encoded}"}}"#)).unwrap())
            .await
            .unwrap();
    }
    inbound_tx
        .send(ClientMessage::parse(r#"{"type":"RecordingFinished"}"#).unwrap())
        .await
        .unwrap();

    let mut observed = Vec::new();
    while let Some(event) = outbound_rx.recv().await {
        let name = event.event_name();
        observed.push(event);
        if name == "tts_not_requested" {
            break;
        }
    }
    inbound_tx
        .send(ClientMessage::parse(r#"{"type":"close_session"}"#).unwrap())
        .await
        .unwrap();
    runtime_task.await.unwrap();

    let complete = position(&observed, "transcription_complete");
    match &observed[complete].payload {
        EventPayload::TranscriptionComplete { text } => {
            assert_eq!(text, "turn on the lights");
        }
        other => panic!("unexpected payload {other:?}"),
    }
    assert!(position(&observed, "transcription") < complete);
    assert!(complete < position(&observed, "text_completed"));

    // The echo provider repeats the transcript as generated text.
    let generated: String = observed
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::TextChunk { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(generated, "turn on the lights");
    assert_dual_completion(&observed);
}

// ── Validation boundary ──────────────────────────────────────────────────────

#[tokio::test]
async fn empty_prompt_is_rejected_without_a_session() {
    let store = Arc::new(MemoryStore::default());
    let deps = {
        let mut builder = DepsBuilder::new();
        builder.store = Some(store.clone() as Arc<dyn SessionStore>);
        builder.build()
    };

    let req = request(
        r#"{"request_type":"text","prompt":"   ",
            "settings":{"text":{"model":"m1"}}}"#,
    );
    let events = run_collect(deps, req).await;

    let error = position(&events, "error");
    assert_eq!(events[error].stage.as_deref(), Some("validation"));
    assert!(store.sessions.lock().unwrap().is_empty(), "no session created");
    assert_dual_completion(&events);
}

// ── Realtime workflow ────────────────────────────────────────────────────────

#[tokio::test]
async fn realtime_turn_roundtrip() {
    let deps = DepsBuilder::new().build();
    let req = request(
        r#"{"request_type":"realtime",
            "settings":{"realtime":{"provider":"loopback"}}}"#,
    );

    let runtime = SessionRuntime::new(deps, "cust-test".into(), 128);
    let (inbound_tx, inbound_rx) = mpsc::channel(8);
    let (outbound_tx, mut outbound_rx) = mpsc::channel(64);
    let runtime_task = tokio::spawn(async move {
        runtime.run(inbound_rx, outbound_tx, req).await;
    });

    let frame = {
        use base64::{Engine as _, engine::general_purpose::STANDARD};
        STANDARD.encode(b"pcm-frame")
    };
    inbound_tx
        .send(ClientMessage::parse(&format!(r#"{{"type":"audio","audio":"{frame}"}}"#)).unwrap())
        .await
        .unwrap();
    inbound_tx
        .send(ClientMessage::parse(r#"{"type":"RecordingFinished"}"#).unwrap())
        .await
        .unwrap();

    let mut observed = Vec::new();
    let mut saw_turn_completed = false;
    while let Some(event) = outbound_rx.recv().await {
        if let EventPayload::CustomEvent { event_type, .. } = &event.payload {
            if event_type == "turn.completed" {
                saw_turn_completed = true;
                observed.push(event);
                // Turn done: hang up.
                inbound_tx
                    .send(ClientMessage::parse(r#"{"type":"cancel"}"#).unwrap())
                    .await
                    .unwrap();
                continue;
            }
        }
        let name = event.event_name();
        observed.push(event);
        if name == "tts_not_requested" || name == "tts_completed" {
            break;
        }
    }
    inbound_tx
        .send(ClientMessage::parse(r#"{"type":"close_session"}"#).unwrap())
        .await
        .unwrap();
    runtime_task.await.unwrap();

    assert!(saw_turn_completed);
    assert!(names(&observed).contains(&"audio_chunk"), "{:?}", names(&observed));
    assert!(names(&observed).contains(&"text_chunk"));
    assert_dual_completion(&observed);
}

// ── P7 via public API ────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_completion_is_indistinguishable_from_one() {
    let (bus, token) = StreamBus::with_defaults();
    let (_, mut rx) = bus.register_consumer();
    let token: Arc<CompletionToken> = Arc::new(token);

    bus.signal_completion(&token).await.unwrap();
    bus.signal_completion(&token).await.unwrap();
    bus.signal_completion(&token).await.unwrap();

    assert_eq!(rx.recv().await, None);
    assert_eq!(rx.recv().await, None);
}
