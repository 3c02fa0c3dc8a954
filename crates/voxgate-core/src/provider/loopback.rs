//! Loopback providers: deterministic in-process adapters.
//!
//! These serve two purposes: they are the test doubles for every workflow
//! suite in this repo, and they let the host binary run end-to-end without
//! vendor credentials. They implement the full provider contracts —
//! including the optional capabilities — so the dispatcher's capability
//! branching is exercised for real.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};

use super::realtime::{RealtimeEvent, RealtimeProvider, RealtimeSession, RealtimeStream};
use super::stt::{SttProvider, TranscriptSegment, TranscriptStream};
use super::text::{TextCapabilities, TextEvent, TextProvider, TextRequest, TextStream};
use super::tts::{
    AudioFormat, AudioStream, DuplexTtsSession, TtsCapabilities, TtsOptions, TtsProvider,
};
use super::ProviderError;
use crate::bus::TtsSignal;
use crate::request::RealtimeSettings;

// ── Text ─────────────────────────────────────────────────────────────────────

/// Text provider that either echoes the prompt in word-sized deltas or
/// replays pre-seeded scripts (one script per `stream` call, in order).
pub struct LoopbackTextProvider {
    capabilities: TextCapabilities,
    scripts: Mutex<VecDeque<Vec<TextEvent>>>,
}

impl LoopbackTextProvider {
    pub fn new() -> Self {
        Self {
            capabilities: TextCapabilities {
                supports_audio_input: true,
                ..TextCapabilities::default()
            },
            scripts: Mutex::new(VecDeque::new()),
        }
    }

    /// Seed the next `stream` calls; each inner vec is consumed by one call.
    pub fn with_scripts(scripts: Vec<Vec<TextEvent>>) -> Self {
        let provider = Self::new();
        *provider.scripts.lock().unwrap() = scripts.into();
        provider
    }

    fn echo_events(text: &str) -> Vec<TextEvent> {
        let mut events: Vec<TextEvent> = text
            .split_inclusive(' ')
            .filter(|piece| !piece.is_empty())
            .map(|piece| TextEvent::Delta(piece.to_string()))
            .collect();
        events.push(TextEvent::Done);
        events
    }
}

impl Default for LoopbackTextProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextProvider for LoopbackTextProvider {
    fn capabilities(&self) -> TextCapabilities {
        self.capabilities.clone()
    }

    async fn stream(&self, request: TextRequest) -> Result<TextStream, ProviderError> {
        let events = match self.scripts.lock().unwrap().pop_front() {
            Some(script) => script,
            None => Self::echo_events(&request.prompt.as_text()),
        };
        Ok(tokio_stream::iter(events.into_iter().map(Ok)).boxed())
    }

    async fn stream_audio(
        &self,
        mut frames: mpsc::Receiver<Bytes>,
        _request: TextRequest,
    ) -> Result<TextStream, ProviderError> {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut count = 0usize;
            while frames.recv().await.is_some() {
                count += 1;
            }
            let _ = tx
                .send(Ok(TextEvent::Delta(format!("heard {count} audio frames"))))
                .await;
            let _ = tx.send(Ok(TextEvent::Done)).await;
        });
        Ok(ReceiverStream::new(rx).boxed())
    }
}

// ── TTS ──────────────────────────────────────────────────────────────────────

/// TTS provider that renders each text chunk into a deterministic
/// pseudo-audio frame (the UTF-8 bytes of the chunk).
pub struct LoopbackTtsProvider {
    capabilities: TtsCapabilities,
}

impl LoopbackTtsProvider {
    /// Duplex-capable variant.
    pub fn streaming() -> Self {
        Self {
            capabilities: TtsCapabilities {
                supports_input_stream: true,
                audio_format: AudioFormat::Pcm16,
                voices: vec!["aria".into(), "orion".into()],
            },
        }
    }

    /// Buffered-only variant, for exercising the fallback path.
    pub fn buffered_only() -> Self {
        Self {
            capabilities: TtsCapabilities {
                supports_input_stream: false,
                audio_format: AudioFormat::Pcm16,
                voices: vec!["aria".into()],
            },
        }
    }

    fn frame_for(text: &str) -> Bytes {
        Bytes::copy_from_slice(text.as_bytes())
    }
}

#[async_trait]
impl TtsProvider for LoopbackTtsProvider {
    fn capabilities(&self) -> TtsCapabilities {
        self.capabilities.clone()
    }

    async fn stream_buffered(
        &self,
        text: String,
        _options: TtsOptions,
    ) -> Result<AudioStream, ProviderError> {
        // One frame per ~16 characters keeps multi-frame behavior visible
        // to callers without caring about real codec framing.
        let chars: Vec<char> = text.chars().collect();
        let frames: Vec<Result<Bytes, ProviderError>> = chars
            .chunks(16)
            .map(|chunk| Ok(Self::frame_for(&chunk.iter().collect::<String>())))
            .collect();
        Ok(tokio_stream::iter(frames).boxed())
    }

    async fn open_duplex(
        &self,
        _options: TtsOptions,
    ) -> Result<DuplexTtsSession, ProviderError> {
        if !self.capabilities.supports_input_stream {
            return Err(ProviderError::Unsupported("duplex input stream"));
        }
        let (input_tx, mut input_rx) = mpsc::channel::<TtsSignal>(64);
        let (audio_tx, audio_rx) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Some(signal) = input_rx.recv().await {
                match signal {
                    TtsSignal::Text(chunk) => {
                        if audio_tx.send(Ok(Self::frame_for(&chunk))).await.is_err() {
                            break;
                        }
                    }
                    TtsSignal::Eos => break,
                }
            }
        });
        Ok(DuplexTtsSession {
            input: input_tx,
            audio: ReceiverStream::new(audio_rx).boxed(),
        })
    }
}

// ── STT ──────────────────────────────────────────────────────────────────────

/// STT provider that treats each audio frame as UTF-8 text, emitting one
/// partial per frame and the joined transcript on finalization.
pub struct LoopbackSttProvider;

#[async_trait]
impl SttProvider for LoopbackSttProvider {
    async fn transcribe(
        &self,
        mut audio: mpsc::Receiver<Bytes>,
    ) -> Result<TranscriptStream, ProviderError> {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut transcript = String::new();
            while let Some(frame) = audio.recv().await {
                let piece = String::from_utf8_lossy(&frame).into_owned();
                if !transcript.is_empty() {
                    transcript.push(' ');
                }
                transcript.push_str(piece.trim());
                let partial = TranscriptSegment {
                    text: piece.trim().to_string(),
                    is_final: false,
                };
                if tx.send(Ok(partial)).await.is_err() {
                    return;
                }
            }
            let _ = tx
                .send(Ok(TranscriptSegment {
                    text: transcript,
                    is_final: true,
                }))
                .await;
        });
        Ok(ReceiverStream::new(rx).boxed())
    }
}

// ── Realtime ─────────────────────────────────────────────────────────────────

/// Realtime provider whose sessions echo input audio back inside a turn.
pub struct LoopbackRealtimeProvider;

struct LoopbackRealtimeSession {
    events_tx: mpsc::UnboundedSender<RealtimeEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<RealtimeEvent>>,
    turn_open: Mutex<bool>,
}

#[async_trait]
impl RealtimeProvider for LoopbackRealtimeProvider {
    async fn open(
        &self,
        _settings: RealtimeSettings,
    ) -> Result<Box<dyn RealtimeSession>, ProviderError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Box::new(LoopbackRealtimeSession {
            events_tx,
            events_rx: Some(events_rx),
            turn_open: Mutex::new(false),
        }))
    }
}

#[async_trait]
impl RealtimeSession for LoopbackRealtimeSession {
    async fn send_audio(&self, frame: Bytes) -> Result<(), ProviderError> {
        let mut open = self.turn_open.lock().unwrap();
        if !*open {
            *open = true;
            let _ = self.events_tx.send(RealtimeEvent::TurnStarted);
        }
        self.events_tx
            .send(RealtimeEvent::TurnAudio(frame))
            .map_err(|_| ProviderError::Transport("realtime session closed".into()))
    }

    async fn commit_input(&self) -> Result<(), ProviderError> {
        let mut open = self.turn_open.lock().unwrap();
        let _ = self.events_tx.send(RealtimeEvent::InputTranscription {
            text: "(loopback input)".to_string(),
            is_final: true,
        });
        let _ = self.events_tx.send(RealtimeEvent::TurnText("ack".into()));
        let _ = self.events_tx.send(RealtimeEvent::TurnCompleted);
        *open = false;
        Ok(())
    }

    fn take_events(&mut self) -> RealtimeStream {
        match self.events_rx.take() {
            Some(rx) => UnboundedReceiverStream::new(rx).map(Ok).boxed(),
            None => tokio_stream::empty().boxed(),
        }
    }

    async fn close(&self) -> Result<(), ProviderError> {
        let _ = self.events_tx.send(RealtimeEvent::SessionClosed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Prompt;
    use crate::request::TextSettings;

    fn request(text: &str) -> TextRequest {
        TextRequest {
            model: "loopback-mini".into(),
            prompt: Prompt::Text(text.into()),
            history: Vec::new(),
            settings: TextSettings::default(),
            tool_results: Vec::new(),
        }
    }

    #[tokio::test]
    async fn echo_mode_streams_word_deltas() {
        let provider = LoopbackTextProvider::new();
        let mut stream = provider.stream(request("say hello world")).await.unwrap();

        let mut text = String::new();
        let mut done = false;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                TextEvent::Delta(piece) => text.push_str(&piece),
                TextEvent::Done => done = true,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(text, "say hello world");
        assert!(done);
    }

    #[tokio::test]
    async fn scripts_are_consumed_in_order() {
        let provider = LoopbackTextProvider::with_scripts(vec![
            vec![TextEvent::Delta("first".into()), TextEvent::Done],
            vec![TextEvent::Delta("second".into()), TextEvent::Done],
        ]);
        let mut s1 = provider.stream(request("ignored")).await.unwrap();
        assert_eq!(
            s1.next().await.unwrap().unwrap(),
            TextEvent::Delta("first".into())
        );
        let mut s2 = provider.stream(request("ignored")).await.unwrap();
        assert_eq!(
            s2.next().await.unwrap().unwrap(),
            TextEvent::Delta("second".into())
        );
    }

    #[tokio::test]
    async fn buffered_tts_frames_cover_the_text() {
        let provider = LoopbackTtsProvider::buffered_only();
        let mut audio = provider
            .stream_buffered("0123456789abcdefXYZ".into(), TtsOptions::default())
            .await
            .unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = audio.next().await {
            frames.push(frame.unwrap());
        }
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], b"0123456789abcdef");
        assert_eq!(&frames[1][..], b"XYZ");
    }

    #[tokio::test]
    async fn duplex_tts_echoes_chunks_until_eos() {
        let provider = LoopbackTtsProvider::streaming();
        let mut session = provider.open_duplex(TtsOptions::default()).await.unwrap();

        session
            .input
            .send(TtsSignal::Text("one".into()))
            .await
            .unwrap();
        session
            .input
            .send(TtsSignal::Text("two".into()))
            .await
            .unwrap();
        session.input.send(TtsSignal::Eos).await.unwrap();

        let mut frames = Vec::new();
        while let Some(frame) = session.audio.next().await {
            frames.push(frame.unwrap());
        }
        assert_eq!(frames, vec![Bytes::from("one"), Bytes::from("two")]);
    }

    #[tokio::test]
    async fn stt_emits_partials_then_final() {
        let provider = LoopbackSttProvider;
        let (tx, rx) = mpsc::channel(8);
        let mut stream = provider.transcribe(rx).await.unwrap();

        tx.send(Bytes::from("turn on")).await.unwrap();
        tx.send(Bytes::from("the lights")).await.unwrap();
        drop(tx);

        let mut segments = Vec::new();
        while let Some(segment) = stream.next().await {
            segments.push(segment.unwrap());
        }
        assert_eq!(segments.len(), 3);
        assert!(!segments[0].is_final);
        assert!(segments[2].is_final);
        assert_eq!(segments[2].text, "turn on the lights");
    }

    #[tokio::test]
    async fn realtime_session_echoes_a_turn() {
        let provider = LoopbackRealtimeProvider;
        let mut session = provider.open(RealtimeSettings::default()).await.unwrap();
        let mut events = session.take_events();

        session.send_audio(Bytes::from("pcm")).await.unwrap();
        session.commit_input().await.unwrap();

        assert_eq!(
            events.next().await.unwrap().unwrap(),
            RealtimeEvent::TurnStarted
        );
        assert_eq!(
            events.next().await.unwrap().unwrap(),
            RealtimeEvent::TurnAudio(Bytes::from("pcm"))
        );
        assert!(matches!(
            events.next().await.unwrap().unwrap(),
            RealtimeEvent::InputTranscription { is_final: true, .. }
        ));
        assert_eq!(
            events.next().await.unwrap().unwrap(),
            RealtimeEvent::TurnText("ack".into())
        );
        assert_eq!(
            events.next().await.unwrap().unwrap(),
            RealtimeEvent::TurnCompleted
        );
    }
}
