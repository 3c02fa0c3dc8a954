//! Multi-consumer streaming bus with completion-token discipline.
//!
//! The bus is the only shared mutable state of a request: every transport
//! consumer (WebSocket, SSE, HTTP collector) registers a bounded queue, and
//! the optional TTS side-channel receives a copy of every non-whitespace
//! text chunk. Closure is owned by a single [`CompletionToken`] minted at
//! construction; see [`StreamBus::signal_completion`].
//!
//! # Delivery contract
//!
//! * Within one consumer queue, events are observed in send order.
//! * Queues are bounded; when full, the oldest non-guaranteed event is
//!   evicted to make room (`drop_oldest`). Dual-flag terminals, `error`,
//!   `cancelled`, and the end-of-stream sentinel are always delivered.
//! * After closure every further send is dropped with a logged warning;
//!   sends never block on a closed bus.
//!
//! Teeing happens here rather than at the producer so the TTS pipeline
//! observes exactly the chunk sequence the frontend sees.

mod token;

pub use token::CompletionToken;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::event::Event;

/// Default per-consumer queue capacity. Overridable via `QUEUE_CAPACITY`.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Raised when a caller without the minted token attempts closure.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("completion ownership error: caller does not hold the stream's token")]
pub struct CompletionOwnershipError;

/// Identifier for a registered consumer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

/// Fan-out target selection for [`StreamBus::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Every consumer queue, plus the TTS tee for text chunks.
    All,
    /// Consumer queues only; text chunks are still teed so that audio never
    /// diverges from the text the frontend saw.
    FrontendOnly,
    /// TTS side-channel only. Used by the tts-only workflow to feed the
    /// synthesizer without emitting frontend text.
    TtsOnly,
}

/// Items flowing through the TTS side-channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TtsSignal {
    /// A non-whitespace text chunk to synthesize.
    Text(String),
    /// End of input; the orchestrator flushes and finishes.
    Eos,
}

// ── Consumer queue ───────────────────────────────────────────────────────────

enum Slot {
    Event(Event),
    Sentinel,
}

struct QueueInner {
    items: VecDeque<Slot>,
    finished: bool,
}

struct ConsumerQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
}

impl ConsumerQueue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.min(64)),
                finished: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    fn push(&self, event: Event) {
        let mut inner = self.inner.lock().unwrap();
        if inner.finished {
            return;
        }
        if inner.items.len() >= self.capacity {
            let evictable = inner
                .items
                .iter()
                .position(|slot| matches!(slot, Slot::Event(e) if !e.is_guaranteed()));
            match evictable {
                Some(idx) => {
                    if let Some(Slot::Event(old)) = inner.items.remove(idx) {
                        debug!(event = old.event_name(), "consumer queue full, evicting oldest");
                    }
                }
                None if !event.is_guaranteed() => {
                    warn!(
                        event = event.event_name(),
                        "consumer queue full of guaranteed events, dropping send"
                    );
                    return;
                }
                // Guaranteed events exceed capacity rather than being lost.
                None => {}
            }
        }
        inner.items.push_back(Slot::Event(event));
        drop(inner);
        self.notify.notify_one();
    }

    fn push_sentinel(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.finished || inner.items.iter().any(|s| matches!(s, Slot::Sentinel)) {
            return;
        }
        inner.items.push_back(Slot::Sentinel);
        drop(inner);
        self.notify.notify_one();
    }

    fn purge_unguaranteed(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .items
            .retain(|slot| !matches!(slot, Slot::Event(e) if !e.is_guaranteed()));
    }
}

/// Receiving half of a consumer queue.
///
/// [`recv`](Self::recv) yields events in send order and `None` exactly once
/// when the stream completes; every call after that returns `None`.
pub struct EventReceiver {
    queue: Arc<ConsumerQueue>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            let notified = self.queue.notify.notified();
            {
                let mut inner = self.queue.inner.lock().unwrap();
                if let Some(slot) = inner.items.pop_front() {
                    match slot {
                        Slot::Event(event) => return Some(event),
                        Slot::Sentinel => {
                            inner.finished = true;
                            return None;
                        }
                    }
                }
                if inner.finished {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Non-blocking variant used by tests and the HTTP collector's
    /// final drain.
    pub fn try_recv(&mut self) -> Option<Event> {
        let mut inner = self.queue.inner.lock().unwrap();
        match inner.items.pop_front() {
            Some(Slot::Event(event)) => Some(event),
            Some(Slot::Sentinel) => {
                inner.finished = true;
                None
            }
            None => None,
        }
    }
}

// ── Bus ──────────────────────────────────────────────────────────────────────

struct BusState {
    consumers: HashMap<ConsumerId, Arc<ConsumerQueue>>,
    next_consumer: u64,
    tts_tx: Option<mpsc::Sender<TtsSignal>>,
    closed: bool,
    quiesced: bool,
}

/// Per-request event distribution structure. See the module docs.
pub struct StreamBus {
    state: Mutex<BusState>,
    owner: Uuid,
    queue_capacity: usize,
}

impl StreamBus {
    /// Construct a bus and mint its completion token.
    ///
    /// The caller that receives the token (the workflow dispatcher) is the
    /// only component that may close the stream.
    pub fn new(queue_capacity: usize) -> (Arc<Self>, CompletionToken) {
        let token = CompletionToken::mint();
        let bus = Arc::new(Self {
            state: Mutex::new(BusState {
                consumers: HashMap::new(),
                next_consumer: 0,
                tts_tx: None,
                closed: false,
                quiesced: false,
            }),
            owner: token.id(),
            queue_capacity: queue_capacity.max(1),
        });
        (bus, token)
    }

    /// Construct with the default queue capacity.
    pub fn with_defaults() -> (Arc<Self>, CompletionToken) {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }

    /// Allocate a bounded queue for a new downstream consumer.
    ///
    /// Registering on an already-closed bus yields a receiver that returns
    /// `None` immediately.
    pub fn register_consumer(&self) -> (ConsumerId, EventReceiver) {
        let mut state = self.state.lock().unwrap();
        let id = ConsumerId(state.next_consumer);
        state.next_consumer += 1;
        let queue = Arc::new(ConsumerQueue::new(self.queue_capacity));
        if state.closed {
            queue.push_sentinel();
        }
        state.consumers.insert(id, Arc::clone(&queue));
        (id, EventReceiver { queue })
    }

    /// Remove a consumer (transport went away). Safe to call twice.
    pub fn deregister_consumer(&self, id: ConsumerId) {
        self.state.lock().unwrap().consumers.remove(&id);
    }

    /// Install the text-chunk side-channel.
    ///
    /// Must be called before the first text chunk is sent or that content
    /// never reaches the synthesizer. On an already-closed bus the channel
    /// is handed its EOS immediately.
    pub fn register_tts_queue(&self, tx: mpsc::Sender<TtsSignal>) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            drop(state);
            if tx.try_send(TtsSignal::Eos).is_err() {
                warn!("tts queue registered on closed bus and receiver already gone");
            }
            return;
        }
        if state.tts_tx.is_some() {
            warn!("tts queue already registered, replacing");
        }
        state.tts_tx = Some(tx);
    }

    /// Remove the side-channel, delivering its EOS sentinel.
    pub async fn deregister_tts_queue(&self) {
        let tx = self.state.lock().unwrap().tts_tx.take();
        if let Some(tx) = tx {
            let _ = tx.send(TtsSignal::Eos).await;
        }
    }

    /// Whether a TTS side-channel is currently installed.
    pub fn has_tts_queue(&self) -> bool {
        self.state.lock().unwrap().tts_tx.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Suppress further non-guaranteed deliveries and purge any that are
    /// still queued. Called by the session runtime the moment a `cancel`
    /// message is dequeued so the next event a client observes is
    /// `cancelled`.
    pub fn quiesce(&self) {
        let mut state = self.state.lock().unwrap();
        state.quiesced = true;
        for queue in state.consumers.values() {
            queue.purge_unguaranteed();
        }
    }

    /// Fan an event out to the selected targets.
    ///
    /// Text chunks are additionally copied into the TTS side-channel when
    /// one is registered and the content is non-whitespace.
    pub async fn send(&self, event: Event, mode: SendMode) {
        let tee = {
            let state = self.state.lock().unwrap();
            if state.closed {
                warn!(event = event.event_name(), "send on closed bus dropped");
                return;
            }
            if state.quiesced && !event.is_guaranteed() {
                debug!(event = event.event_name(), "send on quiesced bus dropped");
                return;
            }

            if matches!(mode, SendMode::All | SendMode::FrontendOnly) {
                for queue in state.consumers.values() {
                    queue.push(event.clone());
                }
            }

            match &event.payload {
                crate::event::EventPayload::TextChunk { content }
                    if !content.trim().is_empty() =>
                {
                    state
                        .tts_tx
                        .as_ref()
                        .map(|tx| (tx.clone(), content.clone()))
                }
                _ => None,
            }
        };

        if let Some((tx, content)) = tee {
            if tx.send(TtsSignal::Text(content)).await.is_err() {
                warn!("tts side-channel receiver gone, dropping chunk");
            }
        }
    }

    /// Close the stream: flip the closed flag, deliver the terminal
    /// sentinel to every consumer, and deliver EOS to the side-channel.
    ///
    /// Idempotent for the owning token; any other token is rejected with
    /// [`CompletionOwnershipError`] and the bus stays open.
    pub async fn signal_completion(
        &self,
        token: &CompletionToken,
    ) -> Result<(), CompletionOwnershipError> {
        let tts_tx = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Ok(());
            }
            if token.id() != self.owner {
                return Err(CompletionOwnershipError);
            }
            state.closed = true;
            for queue in state.consumers.values() {
                queue.push_sentinel();
            }
            state.tts_tx.take()
        };

        if let Some(tx) = tts_tx {
            let _ = tx.send(TtsSignal::Eos).await;
        }
        Ok(())
    }
}

impl Drop for StreamBus {
    fn drop(&mut self) {
        // Safety net for abnormal exits (aborted workflow task): consumers
        // must still observe their sentinel or transport drains would hang.
        let state = self.state.get_mut().unwrap();
        if !state.closed {
            for queue in state.consumers.values() {
                queue.push_sentinel();
            }
            if let Some(tx) = state.tts_tx.take() {
                let _ = tx.try_send(TtsSignal::Eos);
            }
        }
    }
}
