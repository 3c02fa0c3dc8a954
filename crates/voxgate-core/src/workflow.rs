//! Workflow dispatcher: request normalization, workflow selection, and the
//! dual-flag completion contract.
//!
//! The dispatcher is the sole holder of the request's [`CompletionToken`].
//! Whatever happens inside a workflow — normal completion, provider error,
//! timeout, cancellation — [`run`] guarantees that the stream ends with
//! exactly one text-side terminal (`text_completed` | `text_not_requested`),
//! exactly one TTS-side terminal (`tts_completed` | `tts_not_requested`),
//! and exactly one completion sentinel per consumer, with any persistence
//! event emitted before the sentinel.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::bus::{CompletionToken, SendMode, StreamBus};
use crate::config::TimeoutConfig;
use crate::error::{GatewayError, Stage};
use crate::event::Event;
use crate::provider::{
    ModelRegistry, ProviderRegistry, TextEvent, TextRequest, TextStream, ToolOutcome,
};
use crate::request::{ChatRequest, Prompt, RequestType};
use crate::store::{MessageRole, NewStoredMessage, SessionStore, StoredMessage};
use crate::tts::{self, TtsJob};

/// Capacity of the TTS side-channel between bus and orchestrator.
const TTS_QUEUE_CAPACITY: usize = 256;

/// Read-only dependencies shared by every workflow on a connection.
pub struct WorkflowDeps {
    pub providers: Arc<ProviderRegistry>,
    pub models: Arc<ModelRegistry>,
    pub store: Option<Arc<dyn SessionStore>>,
    pub timeouts: TimeoutConfig,
}

/// Frames arriving on the audio ingest queue.
#[derive(Debug, Clone)]
pub enum AudioIngest {
    Frame(Bytes),
    /// The client finished recording (`RecordingFinished`).
    End,
}

/// Per-workflow channels owned by the session runtime.
pub struct WorkflowChannels {
    /// Level-triggered cancellation, set by the runtime on `cancel`.
    pub cancel: CancellationToken,
    /// Inbound audio frames (audio / audio_direct / realtime workflows).
    pub audio_rx: mpsc::Receiver<AudioIngest>,
    /// Client-submitted tool results, resuming a paused text stream.
    pub tool_rx: mpsc::Receiver<Vec<ToolOutcome>>,
}

impl WorkflowChannels {
    /// Channels with no runtime behind them, for single-shot transports
    /// (SSE, HTTP) that cannot deliver audio or tool results.
    pub fn detached(cancel: CancellationToken) -> Self {
        let (_audio_tx, audio_rx) = mpsc::channel(1);
        let (_tool_tx, tool_rx) = mpsc::channel(1);
        Self {
            cancel,
            audio_rx,
            tool_rx,
        }
    }
}

/// Tracks which side of the dual-flag contract has been satisfied.
#[derive(Debug, Default, Clone, Copy)]
struct TerminalFlags {
    text: bool,
    tts: bool,
}

/// Workflow-internal context threaded through the helpers.
struct WorkflowCtx<'a> {
    deps: &'a WorkflowDeps,
    bus: &'a Arc<StreamBus>,
    session_id: Option<String>,
    flags: TerminalFlags,
    tts_handle: Option<JoinHandle<tts::TtsOutcome>>,
    /// Full assistant text accumulated across the stream, for persistence
    /// and the HTTP collector.
    assistant_text: String,
}

impl WorkflowCtx<'_> {
    async fn emit(&self, event: Event) {
        let mut event = event.stamped();
        if let Some(session_id) = &self.session_id {
            event = event.with_session_id(session_id.clone());
        }
        self.bus.send(event, SendMode::All).await;
    }
}

/// Execute one request to completion. This is the workflow task body; it
/// never panics and never returns before the bus is closed.
pub async fn run(
    deps: Arc<WorkflowDeps>,
    bus: Arc<StreamBus>,
    token: CompletionToken,
    request: ChatRequest,
    customer_id: String,
    mut channels: WorkflowChannels,
) {
    let mut ctx = WorkflowCtx {
        deps: &deps,
        bus: &bus,
        session_id: None,
        flags: TerminalFlags::default(),
        tts_handle: None,
        assistant_text: String::new(),
    };

    let outcome = execute(&mut ctx, &request, &customer_id, &mut channels).await;

    let cancelled = matches!(outcome, Err(GatewayError::Cancelled));
    if let Err(err) = &outcome {
        match err {
            GatewayError::Cancelled => {
                debug!("workflow cancelled by client");
            }
            GatewayError::ToolActionPending => {
                debug!("workflow ended with a tool action outstanding");
            }
            other => {
                warn!(error = %other, "workflow terminated with error");
                ctx.emit(Event::error(other.to_string(), other.stage())).await;
            }
        }
    }

    // Resolve the TTS side. On the happy path the orchestrator is already
    // flushing; on cancellation it is aborted so the terminal can be the
    // `tts_not_requested` the contract requires.
    if let Some(handle) = ctx.tts_handle.take() {
        if cancelled {
            handle.abort();
        } else {
            bus.deregister_tts_queue().await;
        }
        match handle.await {
            // Ran to the end: the orchestrator emitted a TTS terminal.
            Ok(_) => ctx.flags.tts = true,
            Err(join_err) if join_err.is_cancelled() => {}
            Err(join_err) => {
                error!(error = %join_err, "tts orchestrator panicked");
            }
        }
    }

    // Emit whatever is missing from the dual-flag contract.
    if !ctx.flags.text {
        ctx.emit(Event::text_not_requested()).await;
    }
    if !ctx.flags.tts {
        ctx.emit(Event::tts_not_requested()).await;
    }

    if bus.signal_completion(&token).await.is_err() {
        // Cannot happen: the dispatcher holds the minted token. Logged to
        // satisfy the recover-locally policy all the same.
        error!("dispatcher token rejected by its own bus");
    }
}

async fn execute(
    ctx: &mut WorkflowCtx<'_>,
    request: &ChatRequest,
    customer_id: &str,
    channels: &mut WorkflowChannels,
) -> Result<(), GatewayError> {
    request.validate()?;

    // Session bind happens before any generation so the client learns the
    // session id early (echoed in a second `websocket_ready`).
    ctx.session_id = ensure_session(ctx, request, customer_id).await;
    if ctx.session_id.is_some() {
        ctx.emit(Event::websocket_ready("2.0")).await;
    }

    ctx.emit(Event::working()).await;

    match request.request_type {
        RequestType::Text => text_workflow(ctx, request, channels, None).await,
        RequestType::Audio => audio_workflow(ctx, request, channels).await,
        RequestType::AudioDirect => audio_direct_workflow(ctx, request, channels).await,
        RequestType::Tts => tts_only_workflow(ctx, request).await,
        RequestType::Realtime => realtime_workflow(ctx, request, channels).await,
    }
}

// ── Session + persistence helpers ────────────────────────────────────────────

async fn ensure_session(
    ctx: &WorkflowCtx<'_>,
    request: &ChatRequest,
    customer_id: &str,
) -> Option<String> {
    let Some(store) = ctx.deps.store.as_ref() else {
        return request.session_id.clone();
    };
    match store
        .ensure_session(customer_id, request.session_id.as_deref())
        .await
    {
        Ok(session_id) => Some(session_id),
        Err(err) => {
            warn!(error = %err, "session bind failed; continuing without persistence");
            ctx.bus
                .send(
                    Event::error(err.to_string(), "persistence").stamped(),
                    SendMode::All,
                )
                .await;
            request.session_id.clone()
        }
    }
}

/// Persist a message and report the outcome on the bus. Failures are
/// non-terminal: the workflow keeps going.
async fn persist_message(ctx: &WorkflowCtx<'_>, message: NewStoredMessage) {
    let (Some(store), Some(session_id)) = (ctx.deps.store.as_ref(), ctx.session_id.as_ref())
    else {
        return;
    };
    match store.append_message(session_id, message).await {
        Ok(_) => ctx.emit(Event::db_operation_executed(true)).await,
        Err(err) => {
            warn!(error = %err, session_id = %session_id, "message persist failed");
            ctx.emit(Event::db_operation_executed(false)).await;
            ctx.emit(Event::error(err.to_string(), "persistence")).await;
        }
    }
}

async fn load_history(ctx: &WorkflowCtx<'_>) -> Vec<StoredMessage> {
    let (Some(store), Some(session_id)) = (ctx.deps.store.as_ref(), ctx.session_id.as_ref())
    else {
        return Vec::new();
    };
    match store.session_messages(session_id).await {
        Ok(messages) => messages,
        Err(err) => {
            warn!(error = %err, "history load failed; generating without history");
            Vec::new()
        }
    }
}

// ── TTS setup ────────────────────────────────────────────────────────────────

/// Start the parallel TTS pipeline when the request asks for it. Must run
/// before the first text chunk so no content misses the tee.
fn setup_parallel_tts(ctx: &mut WorkflowCtx<'_>, request: &ChatRequest) {
    if !request.settings.tts.parallel_enabled() {
        return;
    }
    spawn_tts(ctx, request);
}

fn spawn_tts(ctx: &mut WorkflowCtx<'_>, request: &ChatRequest) {
    let tts_settings = &request.settings.tts;
    let Some(provider_key) = tts_settings.provider.as_deref() else {
        warn!("tts requested without a provider key");
        return;
    };
    let provider = match ctx.deps.providers.tts(provider_key) {
        Ok(provider) => provider,
        Err(err) => {
            warn!(error = %err, "tts provider resolution failed");
            return;
        }
    };

    let storage = ctx.deps.providers.storage();
    let persist = tts_settings.persist.unwrap_or(storage.is_some());
    let (tts_tx, tts_rx) = mpsc::channel(TTS_QUEUE_CAPACITY);
    ctx.bus.register_tts_queue(tts_tx);

    let job = TtsJob {
        provider,
        provider_key: provider_key.to_string(),
        options: crate::provider::TtsOptions {
            voice: tts_settings.voice.clone(),
            model: tts_settings.model.clone(),
            speed: None,
        },
        persist,
        storage,
        timeouts: ctx.deps.timeouts,
        session_id: ctx.session_id.clone(),
    };
    ctx.tts_handle = Some(tts::spawn(Arc::clone(ctx.bus), tts_rx, job));
}

// ── Text workflow ────────────────────────────────────────────────────────────

/// Core text generation, shared by the `text`, `audio`, and `audio_direct`
/// workflows. `prompt_override` replaces the request prompt (used for
/// transcripts).
async fn text_workflow(
    ctx: &mut WorkflowCtx<'_>,
    request: &ChatRequest,
    channels: &mut WorkflowChannels,
    prompt_override: Option<Prompt>,
) -> Result<(), GatewayError> {
    let alias = request.settings.text.model.as_deref().ok_or_else(|| {
        GatewayError::Validation("settings.text.model is required for text generation".into())
    })?;
    let model = ctx.deps.models.resolve(alias)?.clone();
    let provider = ctx.deps.providers.text(&model.provider_key)?;

    setup_parallel_tts(ctx, request);

    let prompt = prompt_override
        .or_else(|| request.prompt.clone())
        .unwrap_or_else(|| Prompt::Text(String::new()));

    persist_message(
        ctx,
        NewStoredMessage::new(MessageRole::User, prompt.as_text())
            .with_attachments(prompt.attachments()),
    )
    .await;

    let history = load_history(ctx).await;
    let mut text_request = TextRequest {
        model: model.model_name.clone(),
        prompt,
        history,
        settings: request.settings.text.clone(),
        tool_results: Vec::new(),
    };

    let stream = open_text_stream(ctx, &provider, text_request.clone(), channels).await?;
    stream_text(ctx, &provider, &model.alias, text_request, stream, channels).await?;

    persist_message(
        ctx,
        NewStoredMessage::new(MessageRole::Assistant, ctx.assistant_text.clone()),
    )
    .await;

    ctx.emit(
        Event::text_completed()
            .with_provider(model.provider_key.clone())
            .with_model(model.alias.clone()),
    )
    .await;
    ctx.flags.text = true;
    Ok(())
}

async fn open_text_stream(
    ctx: &WorkflowCtx<'_>,
    provider: &Arc<dyn crate::provider::TextProvider>,
    request: TextRequest,
    channels: &WorkflowChannels,
) -> Result<TextStream, GatewayError> {
    let opening = timeout(ctx.deps.timeouts.provider_open, provider.stream(request));
    tokio::select! {
        () = channels.cancel.cancelled() => Err(GatewayError::Cancelled),
        opened = opening => match opened {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(err)) => Err(GatewayError::Provider {
                stage: Stage::Text,
                message: err.to_string(),
            }),
            Err(_) => Err(GatewayError::Timeout {
                stage: Stage::Text,
                seconds: ctx.deps.timeouts.provider_open.as_secs(),
            }),
        },
    }
}

/// Pump the provider stream to the bus, pausing for tool results when the
/// provider requests them.
async fn stream_text(
    ctx: &mut WorkflowCtx<'_>,
    provider: &Arc<dyn crate::provider::TextProvider>,
    model_alias: &str,
    mut request: TextRequest,
    mut stream: TextStream,
    channels: &mut WorkflowChannels,
) -> Result<(), GatewayError> {
    loop {
        let next = tokio::select! {
            () = channels.cancel.cancelled() => return Err(GatewayError::Cancelled),
            next = timeout(ctx.deps.timeouts.provider_chunk, stream.next()) => {
                next.map_err(|_| GatewayError::Timeout {
                    stage: Stage::Text,
                    seconds: ctx.deps.timeouts.provider_chunk.as_secs(),
                })?
            }
        };

        match next {
            Some(Ok(TextEvent::Delta(piece))) => {
                ctx.assistant_text.push_str(&piece);
                ctx.emit(Event::text_chunk(piece).with_model(model_alias.to_string()))
                    .await;
            }
            Some(Ok(TextEvent::Thinking(piece))) => {
                ctx.emit(Event::thinking_chunk(piece)).await;
            }
            Some(Ok(TextEvent::ToolCall(invocation))) => {
                ctx.emit(Event::tool_start(
                    invocation.name.clone(),
                    invocation.arguments.clone(),
                ))
                .await;

                // Generation pauses here. `text_completed` stays deferred
                // until the client submits results and the provider resumes.
                let results = tokio::select! {
                    () = channels.cancel.cancelled() => return Err(GatewayError::Cancelled),
                    results = channels.tool_rx.recv() => match results {
                        Some(results) => results,
                        // Single-shot transports cannot deliver tool
                        // results; end the stream and let the caller see
                        // the outstanding tool_start.
                        None => {
                            debug!("no tool-result channel on this transport, ending stream");
                            return Err(GatewayError::ToolActionPending);
                        }
                    },
                };
                for outcome in &results {
                    ctx.emit(Event::tool_result(outcome.name.clone(), outcome.result.clone()))
                        .await;
                }

                request.tool_results = results;
                stream = open_text_stream(ctx, provider, request.clone(), channels).await?;
            }
            Some(Ok(TextEvent::Done)) | None => return Ok(()),
            Some(Err(err)) => {
                return Err(GatewayError::Provider {
                    stage: Stage::Text,
                    message: err.to_string(),
                });
            }
        }
    }
}

// ── Audio workflows ──────────────────────────────────────────────────────────

/// Pump the runtime's ingest queue into a bounded provider channel until
/// `End` (or cancellation). Returns the forwarder handle.
fn forward_audio(
    channels: &mut WorkflowChannels,
    provider_tx: mpsc::Sender<Bytes>,
) -> JoinHandle<()> {
    // The ingest queue receiver moves into the forwarder; a fresh channel
    // is left behind so a second workflow on this runtime starts clean.
    let (replacement_tx, replacement_rx) = mpsc::channel(1);
    drop(replacement_tx);
    let mut audio_rx = std::mem::replace(&mut channels.audio_rx, replacement_rx);
    let cancel = channels.cancel.clone();

    tokio::spawn(async move {
        loop {
            let ingest = tokio::select! {
                () = cancel.cancelled() => break,
                ingest = audio_rx.recv() => ingest,
            };
            match ingest {
                Some(AudioIngest::Frame(frame)) => {
                    if provider_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Some(AudioIngest::End) | None => break,
            }
        }
        // provider_tx drops here: end of input for the provider.
    })
}

async fn audio_workflow(
    ctx: &mut WorkflowCtx<'_>,
    request: &ChatRequest,
    channels: &mut WorkflowChannels,
) -> Result<(), GatewayError> {
    let provider_key = request.settings.audio.provider.as_deref().ok_or_else(|| {
        GatewayError::Validation("settings.audio.provider is required for audio ingest".into())
    })?;
    let provider = ctx.deps.providers.stt(provider_key)?;

    let (frames_tx, frames_rx) = mpsc::channel(64);
    let forwarder = forward_audio(channels, frames_tx);

    let opening = timeout(ctx.deps.timeouts.provider_open, provider.transcribe(frames_rx));
    let mut transcripts = tokio::select! {
        () = channels.cancel.cancelled() => { forwarder.abort(); return Err(GatewayError::Cancelled); }
        opened = opening => match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                forwarder.abort();
                return Err(GatewayError::Provider { stage: Stage::Stt, message: err.to_string() });
            }
            Err(_) => {
                forwarder.abort();
                return Err(GatewayError::Timeout {
                    stage: Stage::Stt,
                    seconds: ctx.deps.timeouts.provider_open.as_secs(),
                });
            }
        },
    };

    let mut final_transcript = None;
    let result = loop {
        let next = tokio::select! {
            () = channels.cancel.cancelled() => break Err(GatewayError::Cancelled),
            next = timeout(ctx.deps.timeouts.provider_chunk, transcripts.next()) => {
                match next {
                    Ok(next) => next,
                    Err(_) => break Err(GatewayError::Timeout {
                        stage: Stage::Stt,
                        seconds: ctx.deps.timeouts.provider_chunk.as_secs(),
                    }),
                }
            }
        };
        match next {
            Some(Ok(segment)) if segment.is_final => {
                ctx.emit(Event::transcription_complete(segment.text.clone()))
                    .await;
                final_transcript = Some(segment.text);
                break Ok(());
            }
            Some(Ok(segment)) => {
                ctx.emit(Event::transcription(segment.text, false)).await;
            }
            Some(Err(err)) => {
                break Err(GatewayError::Provider {
                    stage: Stage::Stt,
                    message: err.to_string(),
                });
            }
            None => break Ok(()),
        }
    };
    forwarder.abort();
    result?;

    match final_transcript {
        Some(transcript) if !transcript.trim().is_empty() => {
            text_workflow(ctx, request, channels, Some(Prompt::Text(transcript))).await
        }
        _ => Err(GatewayError::Provider {
            stage: Stage::Stt,
            message: "transcription produced no text".into(),
        }),
    }
}

async fn audio_direct_workflow(
    ctx: &mut WorkflowCtx<'_>,
    request: &ChatRequest,
    channels: &mut WorkflowChannels,
) -> Result<(), GatewayError> {
    let alias = request.settings.text.model.as_deref().ok_or_else(|| {
        GatewayError::Validation("settings.text.model is required for audio_direct".into())
    })?;
    let model = ctx.deps.models.resolve(alias)?.clone();
    if !model.capabilities.supports_audio_input {
        return Err(GatewayError::Configuration(format!(
            "model '{alias}' does not accept audio input"
        )));
    }
    let provider = ctx.deps.providers.text(&model.provider_key)?;

    setup_parallel_tts(ctx, request);

    let (frames_tx, frames_rx) = mpsc::channel(64);
    let forwarder = forward_audio(channels, frames_tx);

    let text_request = TextRequest {
        model: model.model_name.clone(),
        prompt: request.prompt.clone().unwrap_or(Prompt::Text(String::new())),
        history: load_history(ctx).await,
        settings: request.settings.text.clone(),
        tool_results: Vec::new(),
    };

    let opening = timeout(
        ctx.deps.timeouts.provider_open,
        provider.stream_audio(frames_rx, text_request.clone()),
    );
    let stream = tokio::select! {
        () = channels.cancel.cancelled() => { forwarder.abort(); return Err(GatewayError::Cancelled); }
        opened = opening => match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                forwarder.abort();
                return Err(GatewayError::Provider { stage: Stage::Text, message: err.to_string() });
            }
            Err(_) => {
                forwarder.abort();
                return Err(GatewayError::Timeout {
                    stage: Stage::Text,
                    seconds: ctx.deps.timeouts.provider_open.as_secs(),
                });
            }
        },
    };

    let streamed = stream_text(ctx, &provider, &model.alias, text_request, stream, channels).await;
    forwarder.abort();
    streamed?;

    persist_message(
        ctx,
        NewStoredMessage::new(MessageRole::Assistant, ctx.assistant_text.clone()),
    )
    .await;
    ctx.emit(
        Event::text_completed()
            .with_provider(model.provider_key)
            .with_model(model.alias),
    )
    .await;
    ctx.flags.text = true;
    Ok(())
}

// ── TTS-only workflow ────────────────────────────────────────────────────────

async fn tts_only_workflow(
    ctx: &mut WorkflowCtx<'_>,
    request: &ChatRequest,
) -> Result<(), GatewayError> {
    ctx.emit(Event::text_not_requested()).await;
    ctx.flags.text = true;

    spawn_tts(ctx, request);
    if ctx.tts_handle.is_none() {
        return Err(GatewayError::Configuration(
            "tts workflow requires a resolvable settings.tts.provider".into(),
        ));
    }

    let prompt = request
        .prompt
        .as_ref()
        .map(Prompt::as_text)
        .unwrap_or_default();
    persist_message(ctx, NewStoredMessage::new(MessageRole::User, prompt.clone())).await;

    // Feed the prompt through the bus tee so the orchestrator sees the
    // exact side-channel protocol, without emitting frontend text.
    ctx.bus
        .send(Event::text_chunk(prompt), SendMode::TtsOnly)
        .await;
    // run() deregisters the queue (EOS) and joins the orchestrator.
    Ok(())
}

// ── Realtime workflow ────────────────────────────────────────────────────────

async fn realtime_workflow(
    ctx: &mut WorkflowCtx<'_>,
    request: &ChatRequest,
    channels: &mut WorkflowChannels,
) -> Result<(), GatewayError> {
    let provider_key = request.settings.realtime.provider.as_deref().ok_or_else(|| {
        GatewayError::Validation("settings.realtime.provider is required for realtime".into())
    })?;
    let provider = ctx.deps.providers.realtime(provider_key)?;

    let opening = timeout(
        ctx.deps.timeouts.provider_open,
        provider.open(request.settings.realtime.clone()),
    );
    let mut session = tokio::select! {
        () = channels.cancel.cancelled() => return Err(GatewayError::Cancelled),
        opened = opening => match opened {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => return Err(GatewayError::Provider {
                stage: Stage::Realtime,
                message: err.to_string(),
            }),
            Err(_) => return Err(GatewayError::Timeout {
                stage: Stage::Realtime,
                seconds: ctx.deps.timeouts.provider_open.as_secs(),
            }),
        },
    };
    let mut events = session.take_events();

    let result = loop {
        tokio::select! {
            () = channels.cancel.cancelled() => break Err(GatewayError::Cancelled),

            ingest = channels.audio_rx.recv() => {
                let step = match ingest {
                    Some(AudioIngest::Frame(frame)) => session.send_audio(frame).await,
                    Some(AudioIngest::End) => session.commit_input().await,
                    // Transport went away: end the session gracefully.
                    None => { break Ok(()); }
                };
                if let Err(err) = step {
                    break Err(GatewayError::Provider {
                        stage: Stage::Realtime,
                        message: err.to_string(),
                    });
                }
            }

            event = timeout(ctx.deps.timeouts.realtime_turn, events.next()) => {
                let event = match event {
                    Ok(event) => event,
                    Err(_) => break Err(GatewayError::Timeout {
                        stage: Stage::Realtime,
                        seconds: ctx.deps.timeouts.realtime_turn.as_secs(),
                    }),
                };
                match event {
                    Some(Ok(provider_event)) => {
                        if emit_realtime_event(ctx, provider_event).await {
                            break Ok(());
                        }
                    }
                    Some(Err(err)) => break Err(GatewayError::Provider {
                        stage: Stage::Realtime,
                        message: err.to_string(),
                    }),
                    None => break Ok(()),
                }
            }
        }
    };

    if let Err(err) = session.close().await {
        debug!(error = %err, "realtime session close failed");
    }
    result?;

    // A realtime conversation produced both modalities; both terminals are
    // owned here rather than by a TTS orchestrator.
    ctx.emit(Event::text_completed()).await;
    ctx.flags.text = true;
    ctx.emit(Event::tts_completed()).await;
    ctx.flags.tts = true;
    Ok(())
}

/// Map one provider event onto the envelope. Returns `true` when the
/// session ended.
async fn emit_realtime_event(
    ctx: &WorkflowCtx<'_>,
    event: crate::provider::RealtimeEvent,
) -> bool {
    use crate::provider::RealtimeEvent as Rt;
    match event {
        Rt::TurnStarted => {
            ctx.emit(Event::custom("turn.started", serde_json::json!({})))
                .await;
        }
        Rt::TurnText(text) => ctx.emit(Event::text_chunk(text)).await,
        Rt::TurnAudio(frame) => ctx.emit(Event::audio_chunk(&frame)).await,
        Rt::TurnCompleted => {
            ctx.emit(Event::custom("turn.completed", serde_json::json!({})))
                .await;
        }
        Rt::InputTranscription { text, is_final } => {
            if is_final {
                ctx.emit(Event::transcription_complete(text)).await;
            } else {
                ctx.emit(Event::transcription(text, false)).await;
            }
        }
        Rt::SessionClosed => {
            ctx.emit(Event::custom("session.closed", serde_json::json!({})))
                .await;
            return true;
        }
    }
    false
}
