//! Parallel TTS orchestration.
//!
//! The orchestrator consumes text chunks from the bus side-channel as they
//! stream, synthesizes audio in parallel with the still-running text
//! generation, and interleaves `audio_chunk` events with the text the
//! frontend is receiving. Providers without incremental input degrade to
//! buffered synthesis: the queue is drained to a string first and synthesis
//! starts at EOS.
//!
//! The orchestrator task never propagates an error. Provider failures are
//! reported as a `tts_error` custom event followed unconditionally by
//! `tts_completed`, so the dual-flag completion contract always makes
//! progress.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::bus::{SendMode, StreamBus, TtsSignal};
use crate::config::TimeoutConfig;
use crate::event::Event;
use crate::provider::{
    AudioFormat, AudioStream, BlobStorage, ProviderError, TtsOptions, TtsProvider,
};

/// Everything one synthesis run needs.
pub struct TtsJob {
    pub provider: Arc<dyn TtsProvider>,
    /// Registry key, attached to emitted events as metadata.
    pub provider_key: String,
    pub options: TtsOptions,
    /// Persist concatenated audio to blob storage once synthesis finishes.
    pub persist: bool,
    pub storage: Option<Arc<dyn BlobStorage>>,
    pub timeouts: TimeoutConfig,
    /// Session correlation for emitted events.
    pub session_id: Option<String>,
}

/// Counters surfaced through the orchestrator's `JoinHandle`.
///
/// If the task ran to the end it has emitted a TTS-side terminal; the
/// dispatcher uses an aborted join to know it must emit
/// `tts_not_requested` itself.
#[derive(Debug, Clone, Copy)]
pub struct TtsOutcome {
    pub audio_chunks: u64,
    pub text_chunks: u64,
}

/// Start the background synthesis task.
///
/// `queue` is the side-channel receiver previously registered with the bus;
/// the sending side stays inside the bus and is closed via
/// `deregister_tts_queue` (or `signal_completion`), which delivers the EOS
/// sentinel this task flushes on.
pub fn spawn(
    bus: Arc<StreamBus>,
    queue: mpsc::Receiver<TtsSignal>,
    job: TtsJob,
) -> JoinHandle<TtsOutcome> {
    tokio::spawn(run(bus, queue, job))
}

async fn run(bus: Arc<StreamBus>, queue: mpsc::Receiver<TtsSignal>, job: TtsJob) -> TtsOutcome {
    let supports_duplex = job.provider.capabilities().supports_input_stream;
    let result = if supports_duplex {
        run_duplex(&bus, queue, &job).await
    } else {
        run_buffered(&bus, queue, &job).await
    };

    let (outcome, collected) = match result {
        Ok((outcome, collected)) => {
            emit(
                &bus,
                &job,
                Event::tts_generation_completed(outcome.audio_chunks, outcome.text_chunks),
            )
            .await;
            (outcome, collected)
        }
        Err(err) => {
            warn!(error = %err, provider = %job.provider_key, "tts synthesis failed");
            emit(
                &bus,
                &job,
                Event::custom(
                    "tts_error",
                    serde_json::json!({ "message": err.to_string() }),
                ),
            )
            .await;
            (
                TtsOutcome {
                    audio_chunks: 0,
                    text_chunks: 0,
                },
                Vec::new(),
            )
        }
    };

    emit(&bus, &job, Event::tts_completed()).await;

    if !collected.is_empty() {
        upload_artifact(&bus, &job, collected).await;
    }
    outcome
}

// ── Duplex path ──────────────────────────────────────────────────────────────

async fn run_duplex(
    bus: &Arc<StreamBus>,
    mut queue: mpsc::Receiver<TtsSignal>,
    job: &TtsJob,
) -> Result<(TtsOutcome, Vec<u8>), ProviderError> {
    let session = timeout(
        job.timeouts.provider_open,
        job.provider.open_duplex(job.options.clone()),
    )
    .await
    .map_err(|_| ProviderError::Transport("timed out opening duplex synthesis".into()))??;

    emit(bus, job, Event::tts_started(job.options.voice.clone())).await;

    // Send loop: forward side-channel signals to the provider. EOS is the
    // provider's end-of-input token; after forwarding it the loop ends and
    // the receive loop below drains the remaining frames.
    let input = session.input;
    let send_loop: JoinHandle<u64> = tokio::spawn(async move {
        let mut text_chunks = 0u64;
        loop {
            match queue.recv().await {
                Some(TtsSignal::Text(chunk)) => {
                    text_chunks += 1;
                    if input.send(TtsSignal::Text(chunk)).await.is_err() {
                        break;
                    }
                }
                Some(TtsSignal::Eos) => {
                    let _ = input.send(TtsSignal::Eos).await;
                    break;
                }
                // Channel closed without an explicit EOS (bus dropped):
                // tell the provider anyway so it can flush.
                None => {
                    let _ = input.try_send(TtsSignal::Eos);
                    break;
                }
            }
        }
        text_chunks
    });

    let (audio_chunks, collected) = pump_audio(bus, job, session.audio).await?;
    let text_chunks = send_loop.await.unwrap_or(0);

    Ok((
        TtsOutcome {
            audio_chunks,
            text_chunks,
        },
        collected,
    ))
}

// ── Buffered fallback ────────────────────────────────────────────────────────

async fn run_buffered(
    bus: &Arc<StreamBus>,
    mut queue: mpsc::Receiver<TtsSignal>,
    job: &TtsJob,
) -> Result<(TtsOutcome, Vec<u8>), ProviderError> {
    let mut buffer = String::new();
    let mut text_chunks = 0u64;
    while let Some(signal) = queue.recv().await {
        match signal {
            TtsSignal::Text(chunk) => {
                text_chunks += 1;
                buffer.push_str(&chunk);
            }
            TtsSignal::Eos => break,
        }
    }

    if buffer.trim().is_empty() {
        debug!("buffered tts: no text to synthesize");
        return Ok((
            TtsOutcome {
                audio_chunks: 0,
                text_chunks,
            },
            Vec::new(),
        ));
    }

    let audio = timeout(
        job.timeouts.provider_open,
        job.provider.stream_buffered(buffer, job.options.clone()),
    )
    .await
    .map_err(|_| ProviderError::Transport("timed out starting buffered synthesis".into()))??;

    emit(bus, job, Event::tts_started(job.options.voice.clone())).await;

    let (audio_chunks, collected) = pump_audio(bus, job, audio).await?;
    Ok((
        TtsOutcome {
            audio_chunks,
            text_chunks,
        },
        collected,
    ))
}

// ── Shared plumbing ──────────────────────────────────────────────────────────

/// Drain the audio stream, emitting one `audio_chunk` per frame. Returns
/// the frame count and, when persistence is on, the concatenated bytes.
async fn pump_audio(
    bus: &Arc<StreamBus>,
    job: &TtsJob,
    mut audio: AudioStream,
) -> Result<(u64, Vec<u8>), ProviderError> {
    let mut frames = 0u64;
    let mut collected = Vec::new();
    loop {
        let next = timeout(job.timeouts.provider_chunk, audio.next())
            .await
            .map_err(|_| ProviderError::Transport("timed out waiting for audio frame".into()))?;
        match next {
            Some(Ok(frame)) => {
                frames += 1;
                if job.persist && job.storage.is_some() {
                    collected.extend_from_slice(&frame);
                }
                emit(bus, job, Event::audio_chunk(&frame)).await;
            }
            Some(Err(err)) => return Err(err),
            None => break,
        }
    }
    Ok((frames, collected))
}

/// Persist the concatenated frames and report the artifact URL.
async fn upload_artifact(bus: &Arc<StreamBus>, job: &TtsJob, collected: Vec<u8>) {
    let Some(storage) = job.storage.as_ref() else {
        return;
    };

    let format = job.provider.capabilities().audio_format;
    let key = format!("tts/{}.{}", uuid::Uuid::new_v4(), extension(format));
    let put = storage.put(&key, collected.into(), format.content_type());
    match timeout(job.timeouts.blob_put, put).await {
        Ok(Ok(url)) => {
            emit(bus, job, Event::tts_file_uploaded(url)).await;
        }
        Ok(Err(err)) => {
            warn!(error = %err, "tts artifact upload failed");
            emit(bus, job, Event::error(err.to_string(), "storage")).await;
        }
        Err(_) => {
            warn!("tts artifact upload timed out");
            emit(bus, job, Event::error("blob put timed out", "storage")).await;
        }
    }
}

async fn emit(bus: &Arc<StreamBus>, job: &TtsJob, event: Event) {
    let mut event = event.with_provider(job.provider_key.clone()).stamped();
    if let Some(model) = &job.options.model {
        event = event.with_model(model.clone());
    }
    if let Some(session_id) = &job.session_id {
        event = event.with_session_id(session_id.clone());
    }
    bus.send(event, SendMode::All).await;
}

const fn extension(format: AudioFormat) -> &'static str {
    match format {
        AudioFormat::Pcm16 => "pcm",
        AudioFormat::Mp3 => "mp3",
        AudioFormat::OggOpus => "ogg",
    }
}
