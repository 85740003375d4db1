//! Chat Service
//!
//! Runs one chat turn at a time: persists the user's message, streams the
//! assistant reply through a `StreamSession`, persists the reply, and kicks
//! off background analysis for the day. A busy ceiling guarantees the busy
//! flag is cleared even when a stream never terminates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::NaiveDate;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use insight_sync_core::CorrelationId;
use insight_sync_llm::{LlmProvider, LlmRequestOptions, Message};

use crate::models::settings::AppConfig;
use crate::models::transcript::{Turn, TurnRole};
use crate::services::analysis::orchestrator::{AnalysisOrchestrator, AnalysisOutcome, AnalysisTrigger};
use crate::services::analysis::prompts::CHAT_SYSTEM_PROMPT;
use crate::services::streaming::{StreamAbort, StreamObserver, StreamSession, StreamState, TypewriterConfig};
use crate::storage::transcript::TranscriptStore;
use crate::utils::clock::{Clock, DayCalendar};
use crate::utils::error::{AppError, AppResult};

/// Marker for "no turn in progress".
const IDLE: u64 = 0;

type AnalysisTask = JoinHandle<AppResult<Vec<AnalysisOutcome>>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatSettings {
    /// Most recent turns of the day sent as history
    pub history_turns: usize,
    pub temperature: f32,
    pub busy_ceiling: Duration,
    pub typewriter: TypewriterConfig,
    /// Run the day's analyses after each completed reply
    pub analyze_on_complete: bool,
}

impl ChatSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            history_turns: usize::try_from(config.chat_history_turns).unwrap_or(usize::MAX),
            temperature: config.chat_temperature,
            busy_ceiling: Duration::from_secs(config.busy_ceiling_secs),
            typewriter: TypewriterConfig::from_config(config),
            analyze_on_complete: true,
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// One in-progress chat turn.
pub struct ChatTurn {
    pub user_id: String,
    pub day: NaiveDate,
    pub correlation: CorrelationId,
    session: Arc<StreamSession>,
    analysis: Arc<Mutex<Option<AnalysisTask>>>,
}

impl ChatTurn {
    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    pub fn cancel(&self) {
        self.session.cancel();
    }

    pub async fn wait(&self) -> StreamState {
        self.session.wait().await
    }

    /// Wait for the reply and then for the analyses it triggered.
    ///
    /// Returns `None` when the turn did not complete or analysis is disabled.
    pub async fn wait_analysis(&self) -> Option<Vec<AnalysisOutcome>> {
        if self.session.wait().await != StreamState::Complete {
            return None;
        }
        let task = self.analysis.lock().ok().and_then(|mut slot| slot.take())?;
        match task.await {
            Ok(Ok(outcomes)) => Some(outcomes),
            Ok(Err(e)) => {
                warn!("[ChatService] Analysis for {} failed to start: {}", self.user_id, e);
                None
            }
            Err(e) => {
                warn!("[ChatService] Analysis task for {} ended abnormally: {}", self.user_id, e);
                None
            }
        }
    }
}

pub struct ChatService {
    provider: Arc<dyn LlmProvider>,
    transcripts: Arc<dyn TranscriptStore>,
    orchestrator: Arc<AnalysisOrchestrator>,
    clock: Arc<dyn Clock>,
    calendar: DayCalendar,
    settings: ChatSettings,
    /// Id of the turn holding the busy flag, or `IDLE`
    active_turn: Arc<AtomicU64>,
    next_turn: AtomicU64,
}

impl ChatService {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        transcripts: Arc<dyn TranscriptStore>,
        orchestrator: Arc<AnalysisOrchestrator>,
        clock: Arc<dyn Clock>,
        calendar: DayCalendar,
        settings: ChatSettings,
    ) -> Self {
        Self {
            provider,
            transcripts,
            orchestrator,
            clock,
            calendar,
            settings,
            active_turn: Arc::new(AtomicU64::new(IDLE)),
            next_turn: AtomicU64::new(1),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.active_turn.load(Ordering::SeqCst) != IDLE
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Start a chat turn for `user_id`.
    ///
    /// Fails with `AppError::Busy` while a previous turn is still streaming.
    pub fn stream_chat(
        &self,
        user_id: &str,
        prompt: &str,
        observer: Arc<dyn StreamObserver>,
    ) -> AppResult<ChatTurn> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(AppError::validation("Message must not be empty"));
        }

        let turn_id = self.next_turn.fetch_add(1, Ordering::SeqCst);
        if self
            .active_turn
            .compare_exchange(IDLE, turn_id, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::busy("A reply is still in progress"));
        }

        match self.start_turn(turn_id, user_id, prompt, observer) {
            Ok(turn) => Ok(turn),
            Err(e) => {
                release(&self.active_turn, turn_id);
                Err(e)
            }
        }
    }

    fn start_turn(
        &self,
        turn_id: u64,
        user_id: &str,
        prompt: &str,
        observer: Arc<dyn StreamObserver>,
    ) -> AppResult<ChatTurn> {
        let now = self.clock.now();
        let day = self.calendar.day_of(now);
        self.transcripts.append(user_id, day, &Turn::user(prompt, now))?;

        let history = self.transcripts.list(user_id, day)?;
        let skip = history.len().saturating_sub(self.settings.history_turns.max(1));
        let messages: Vec<Message> = history
            .iter()
            .skip(skip)
            .map(|turn| match turn.role {
                TurnRole::User => Message::user(turn.text.clone()),
                TurnRole::Assistant => Message::assistant(turn.text.clone()),
            })
            .collect();

        let correlation = CorrelationId::new();
        let done = CancellationToken::new();
        let analysis: Arc<Mutex<Option<AnalysisTask>>> = Arc::new(Mutex::new(None));

        let wrapped = Arc::new(TurnObserver {
            inner: observer,
            turn_id,
            active_turn: Arc::clone(&self.active_turn),
            done: done.clone(),
            user_id: user_id.to_string(),
            day,
            model: self.provider.model().to_string(),
            correlation,
            transcripts: Arc::clone(&self.transcripts),
            orchestrator: self
                .settings
                .analyze_on_complete
                .then(|| Arc::clone(&self.orchestrator)),
            clock: Arc::clone(&self.clock),
            analysis: Arc::clone(&analysis),
        });

        let provider = Arc::clone(&self.provider);
        let options = LlmRequestOptions::default().with_temperature(self.settings.temperature);
        info!(
            "[ChatService] Turn {} for {} on {} ({} history turns)",
            turn_id,
            user_id,
            day,
            messages.len()
        );
        let session = Arc::new(StreamSession::open(
            move |tx| async move {
                provider
                    .stream_message(messages, Some(CHAT_SYSTEM_PROMPT.to_string()), tx, options)
                    .await
            },
            wrapped,
            self.settings.typewriter,
        ));

        spawn_watchdog(
            Arc::downgrade(&session),
            Arc::clone(&self.active_turn),
            turn_id,
            self.settings.busy_ceiling,
            done,
        );

        Ok(ChatTurn {
            user_id: user_id.to_string(),
            day,
            correlation,
            session,
            analysis,
        })
    }
}

/// Clear the busy flag if `turn_id` still holds it.
fn release(active_turn: &AtomicU64, turn_id: u64) -> bool {
    active_turn
        .compare_exchange(turn_id, IDLE, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

fn spawn_watchdog(
    session: Weak<StreamSession>,
    active_turn: Arc<AtomicU64>,
    turn_id: u64,
    ceiling: Duration,
    done: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = done.cancelled() => {}
            _ = tokio::time::sleep(ceiling) => {
                warn!("[ChatService] Turn {} exceeded the {:?} busy ceiling, aborting", turn_id, ceiling);
                if let Some(session) = session.upgrade() {
                    session.abort(StreamAbort::SafetyValve);
                }
                release(&active_turn, turn_id);
            }
        }
    });
}

/// Wraps the caller's observer with turn bookkeeping.
struct TurnObserver {
    inner: Arc<dyn StreamObserver>,
    turn_id: u64,
    active_turn: Arc<AtomicU64>,
    done: CancellationToken,
    user_id: String,
    day: NaiveDate,
    model: String,
    correlation: CorrelationId,
    transcripts: Arc<dyn TranscriptStore>,
    orchestrator: Option<Arc<AnalysisOrchestrator>>,
    clock: Arc<dyn Clock>,
    analysis: Arc<Mutex<Option<AnalysisTask>>>,
}

impl TurnObserver {
    fn finish_turn(&self) {
        self.done.cancel();
        release(&self.active_turn, self.turn_id);
    }
}

impl StreamObserver for TurnObserver {
    fn on_fragment(&self, text: &str) {
        self.inner.on_fragment(text);
    }

    fn on_complete(&self, full_text: &str) {
        let reply = Turn::assistant(full_text, Some(self.model.clone()), self.clock.now());
        if let Err(e) = self.transcripts.append(&self.user_id, self.day, &reply) {
            warn!("[ChatService] Failed to store reply for {}: {}", self.user_id, e);
        }
        self.finish_turn();
        self.inner.on_complete(full_text);

        if let Some(orchestrator) = &self.orchestrator {
            let orchestrator = Arc::clone(orchestrator);
            let user_id = self.user_id.clone();
            let day = self.day;
            let correlation = self.correlation;
            debug!("[ChatService] Scheduling analyses for {} on {}", user_id, day);
            let task = tokio::spawn(async move {
                orchestrator
                    .run_all(&user_id, day, AnalysisTrigger::TurnCompleted, correlation)
                    .await
            });
            if let Ok(mut slot) = self.analysis.lock() {
                *slot = Some(task);
            }
        }
    }

    fn on_error(&self, message: &str) {
        self.finish_turn();
        self.inner.on_error(message);
    }

    fn on_aborted(&self, reason: StreamAbort) {
        self.finish_turn();
        self.inner.on_aborted(reason);
    }
}
