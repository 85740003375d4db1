//! Token Stream Consumer
//!
//! Replays one generation stream to an observer at a fixed cadence. Incoming
//! fragments are split into characters and queued; a timer reveals
//! `chars_per_tick` characters per tick no matter how bursty the backend is.
//! Once production ends the queue keeps draining, with completion checked on
//! a poll interval and capped by a wait limit, after which any remainder is
//! flushed at once. Exactly one terminal callback is delivered per session.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use insight_sync_core::UnifiedStreamEvent;
use insight_sync_llm::{LlmResponse, LlmResult};

use crate::models::settings::AppConfig;

/// Channel capacity between the backend call and the consumer.
const EVENT_BUFFER: usize = 256;

/// Why a session was stopped before completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAbort {
    /// `cancel()` or teardown
    Cancelled,
    /// The chat busy ceiling was reached
    SafetyValve,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Draining,
    Complete,
    /// Upstream failed before producing any text
    Failed(String),
    Aborted(StreamAbort),
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamState::Complete | StreamState::Failed(_) | StreamState::Aborted(_)
        )
    }
}

/// Receives a session's output. Callbacks run on the session task.
pub trait StreamObserver: Send + Sync {
    fn on_fragment(&self, text: &str);

    fn on_complete(&self, full_text: &str);

    fn on_error(&self, _message: &str) {}

    fn on_aborted(&self, _reason: StreamAbort) {}
}

/// Reveal cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypewriterConfig {
    pub tick: Duration,
    pub chars_per_tick: usize,
    pub drain_wait_cap: Duration,
    pub drain_poll: Duration,
}

impl TypewriterConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            tick: Duration::from_millis(config.typewriter_tick_ms.max(1)),
            chars_per_tick: usize::try_from(config.typewriter_chars_per_tick)
                .unwrap_or(usize::MAX)
                .max(1),
            drain_wait_cap: Duration::from_millis(config.drain_wait_cap_ms),
            drain_poll: Duration::from_millis(config.drain_poll_ms.max(1)),
        }
    }
}

impl Default for TypewriterConfig {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

struct SessionShared {
    observer: Arc<dyn StreamObserver>,
    state: watch::Sender<StreamState>,
    terminal: AtomicBool,
    abort_reason: Mutex<Option<StreamAbort>>,
    revealed: Mutex<String>,
}

impl SessionShared {
    /// Move to a terminal state; only the first caller wins.
    fn finish(&self, state: StreamState, full_text: &str) -> bool {
        if self
            .terminal
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        match &state {
            StreamState::Complete => self.observer.on_complete(full_text),
            StreamState::Failed(message) => self.observer.on_error(message),
            StreamState::Aborted(reason) => self.observer.on_aborted(*reason),
            StreamState::Idle | StreamState::Draining => {}
        }
        self.state.send_replace(state);
        true
    }

    fn reveal(&self, chunk: &str) {
        if chunk.is_empty() || self.terminal.load(Ordering::SeqCst) {
            return;
        }
        if let Ok(mut revealed) = self.revealed.lock() {
            revealed.push_str(chunk);
        }
        self.observer.on_fragment(chunk);
    }
}

/// One in-flight generation stream and its reveal timer.
pub struct StreamSession {
    shared: Arc<SessionShared>,
    cancel: CancellationToken,
}

impl StreamSession {
    /// Start `call` and consume its events. `call` receives the sender the
    /// backend writes fragments to; its result tells the session whether the
    /// upstream call failed.
    pub fn open<F, Fut>(call: F, observer: Arc<dyn StreamObserver>, config: TypewriterConfig) -> Self
    where
        F: FnOnce(mpsc::Sender<UnifiedStreamEvent>) -> Fut,
        Fut: Future<Output = LlmResult<LlmResponse>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (state, _) = watch::channel(StreamState::Idle);
        let shared = Arc::new(SessionShared {
            observer,
            state,
            terminal: AtomicBool::new(false),
            abort_reason: Mutex::new(None),
            revealed: Mutex::new(String::new()),
        });
        let cancel = CancellationToken::new();

        let upstream = tokio::spawn(call(tx));
        shared.state.send_replace(StreamState::Draining);
        tokio::spawn(drive(Arc::clone(&shared), rx, upstream, cancel.clone(), config));

        Self { shared, cancel }
    }

    pub fn state(&self) -> StreamState {
        self.shared.state.borrow().clone()
    }

    /// Text revealed to the observer so far.
    pub fn revealed(&self) -> String {
        match self.shared.revealed.lock() {
            Ok(revealed) => revealed.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Stop the session. Safe to call in any state and any number of times;
    /// after a terminal state it does nothing.
    pub fn cancel(&self) {
        self.abort(StreamAbort::Cancelled);
    }

    pub(crate) fn abort(&self, reason: StreamAbort) {
        if self.shared.terminal.load(Ordering::SeqCst) {
            return;
        }
        if let Ok(mut slot) = self.shared.abort_reason.lock() {
            slot.get_or_insert(reason);
        }
        self.cancel.cancel();
    }

    /// Wait for the terminal state.
    pub async fn wait(&self) -> StreamState {
        let mut rx = self.shared.state.subscribe();
        loop {
            {
                let state = rx.borrow_and_update();
                if state.is_terminal() {
                    return state.clone();
                }
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn take_chars(queue: &mut VecDeque<char>, n: usize) -> String {
    let count = n.min(queue.len());
    queue.drain(..count).collect()
}

async fn drive(
    shared: Arc<SessionShared>,
    mut rx: mpsc::Receiver<UnifiedStreamEvent>,
    mut upstream: tokio::task::JoinHandle<LlmResult<LlmResponse>>,
    cancel: CancellationToken,
    config: TypewriterConfig,
) {
    let mut queue: VecDeque<char> = VecDeque::new();
    let mut full_text = String::new();
    let mut error: Option<String> = None;
    let mut channel_open = true;
    let mut upstream_running = true;

    let mut ticker = tokio::time::interval(config.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Production phase
    while channel_open || upstream_running {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                upstream.abort();
                abort(&shared);
                return;
            }
            event = rx.recv(), if channel_open => match event {
                Some(UnifiedStreamEvent::TextDelta { content }) => {
                    full_text.push_str(&content);
                    queue.extend(content.chars());
                }
                Some(UnifiedStreamEvent::Error { message, .. }) => {
                    error.get_or_insert(message);
                }
                Some(UnifiedStreamEvent::Usage { .. }) | Some(UnifiedStreamEvent::Complete { .. }) => {}
                None => channel_open = false,
            },
            joined = &mut upstream, if upstream_running => {
                upstream_running = false;
                match joined {
                    Ok(Ok(response)) => {
                        debug!("[StreamConsumer] Upstream finished ({:?})", response.stop_reason);
                    }
                    Ok(Err(e)) => {
                        error.get_or_insert(e.to_string());
                    }
                    Err(e) => {
                        error.get_or_insert(format!("stream task failed: {}", e));
                    }
                }
            }
            _ = ticker.tick() => {
                let chunk = take_chars(&mut queue, config.chars_per_tick);
                shared.reveal(&chunk);
            }
        }
    }

    // Drain phase
    if !queue.is_empty() {
        let deadline = Instant::now() + config.drain_wait_cap;
        let mut poll = tokio::time::interval(config.drain_poll);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    abort(&shared);
                    return;
                }
                _ = ticker.tick() => {
                    let chunk = take_chars(&mut queue, config.chars_per_tick);
                    shared.reveal(&chunk);
                }
                _ = poll.tick() => {
                    if queue.is_empty() {
                        break;
                    }
                    if Instant::now() >= deadline {
                        debug!("[StreamConsumer] Drain cap reached, flushing {} chars", queue.len());
                        let rest: String = queue.drain(..).collect();
                        shared.reveal(&rest);
                        break;
                    }
                }
            }
        }
    }

    match error {
        Some(message) if full_text.is_empty() => {
            warn!("[StreamConsumer] Stream failed before any text: {}", message);
            shared.finish(StreamState::Failed(message), "");
        }
        Some(message) => {
            warn!("[StreamConsumer] Stream ended early, keeping partial text: {}", message);
            shared.finish(StreamState::Complete, &full_text);
        }
        None => {
            shared.finish(StreamState::Complete, &full_text);
        }
    }
}

fn abort(shared: &SessionShared) {
    let reason = shared
        .abort_reason
        .lock()
        .ok()
        .and_then(|slot| *slot)
        .unwrap_or(StreamAbort::Cancelled);
    if shared.finish(StreamState::Aborted(reason), "") {
        info!("[StreamConsumer] Session aborted ({:?})", reason);
    }
}
