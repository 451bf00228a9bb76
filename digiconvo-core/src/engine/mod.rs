//! `ConversationEngine`: top-level turn orchestrator.
//!
//! ## Lifecycle
//!
//! ```text
//! ConversationEngine::new()
//!     └─► start_session(scenario)   → fresh transcript, generation bumped
//!         └─► submit(text)          → user echo, typing = true
//!               ├─► tone task       → EmotionUpdated (or warn! only)
//!               └─► reply task      → AI message (or fallback), typing = false
//!                     └─► speech    → speaking = true … on_end → false
//! ```
//!
//! `submit` appends the user message and emits its event before either task
//! is spawned, so hosts always see the echo first.
//!
//! ## Threading
//!
//! All state sits behind one `parking_lot::Mutex` that is never held across an
//! `.await` or while calling into `PlaybackSession`. Tasks are spawned on the
//! ambient tokio runtime, so `submit` must be called from inside one.

pub mod turn;

pub use turn::{TurnDiagnostics, TurnHandle, TurnSnapshot};

use std::sync::{atomic::AtomicU64, atomic::Ordering, Arc};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    backend::{ChatTurn, ConversationBackend},
    conversation::{ConversationSnapshot, ConversationState, Message, Scenario},
    error::{ConvoError, Result},
    ipc::events::{ActivityEvent, ConversationEvent, ConversationEventKind},
    playback::{PlaybackSession, PlaybackSnapshot},
};
use turn::{EventBus, TurnContext};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

pub const FALLBACK_REPLY: &str = "Sorry, I encountered an error. Please try again.";

/// Configuration for `ConversationEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// AI message appended when the scenario reply fails.
    pub fallback_reply: String,
    /// Whether reply audio is played. Default: true.
    pub speech_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fallback_reply: FALLBACK_REPLY.to_string(),
            speech_enabled: true,
        }
    }
}

/// The top-level engine handle.
///
/// `ConversationEngine` is `Send + Sync`; wrap it in an `Arc` to share it
/// between the host's command handlers and event-forwarding tasks.
pub struct ConversationEngine<B> {
    config: EngineConfig,
    backend: Arc<B>,
    state: Arc<Mutex<ConversationState>>,
    playback: PlaybackSession,
    events: EventBus,
    diagnostics: Arc<TurnDiagnostics>,
}

impl<B: ConversationBackend> ConversationEngine<B> {
    pub fn new(config: EngineConfig, backend: Arc<B>, playback: PlaybackSession) -> Self {
        let (conversation_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);
        let state = ConversationState::new(config.speech_enabled);

        Self {
            config,
            backend,
            state: Arc::new(Mutex::new(state)),
            playback,
            events: EventBus {
                conversation_tx,
                activity_tx,
                seq: Arc::new(AtomicU64::new(0)),
            },
            diagnostics: Arc::new(TurnDiagnostics::default()),
        }
    }

    /// Begin a fresh session for `scenario`. Stops any speech and discards
    /// results of turns still in flight. Returns the new session id.
    pub fn start_session(&self, scenario: Scenario) -> String {
        let scenario_id = scenario.id.clone();
        let (session_id, generation) = {
            let mut state = self.state.lock();
            let generation = state.begin_session(scenario);
            (state.session_id.clone(), generation)
        };
        // Must follow the generation bump; a clip still being set up
        // re-checks the generation once it is in the slot.
        self.playback.stop();

        info!(%session_id, scenario = %scenario_id, generation, "session started");
        self.events
            .conversation(&session_id, ConversationEventKind::SessionStarted { scenario_id });
        self.events.activity(false, false, None);
        session_id
    }

    /// Clear the transcript and emotions of the current session.
    pub fn clear_chat(&self) {
        let (session_id, generation) = {
            let mut state = self.state.lock();
            let generation = state.reset_transcript();
            (state.session_id.clone(), generation)
        };
        self.playback.stop();

        info!(%session_id, generation, "chat cleared");
        self.events
            .conversation(&session_id, ConversationEventKind::TranscriptCleared);
        self.events.activity(false, false, None);
    }

    /// Submit a user message and dispatch its turn.
    ///
    /// # Errors
    /// - `ConvoError::EmptyMessage` if `text` is blank.
    /// - `ConvoError::NoScenario` if no session has been started.
    pub fn submit(&self, text: &str) -> Result<TurnHandle> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ConvoError::EmptyMessage);
        }

        let (message, history, scenario, generation, session_id, speaking) = {
            let mut state = self.state.lock();
            let scenario = state.scenario.clone().ok_or(ConvoError::NoScenario)?;
            let message = Message::user(text);
            state.messages.push(message.clone());
            state.typing = true;
            let history: Vec<ChatTurn> = state.messages.iter().map(ChatTurn::from).collect();
            (
                message,
                history,
                scenario,
                state.generation,
                state.session_id.clone(),
                state.speaking,
            )
        };

        self.diagnostics
            .turns_submitted
            .fetch_add(1, Ordering::Relaxed);
        info!(
            message_id = %message.id,
            scenario = %scenario.id,
            history = history.len(),
            "turn submitted"
        );

        let message_id = message.id.clone();
        self.events
            .conversation(&session_id, ConversationEventKind::MessageAppended { message });
        self.events.activity(true, speaking, None);

        let ctx = self.turn_context(generation);
        let tone = tokio::spawn(ctx.clone().run_tone(message_id, text.to_string()));
        let reply = tokio::spawn(ctx.run_reply(history, scenario));
        Ok(TurnHandle { tone, reply })
    }

    /// Cut off the current AI speech, if any.
    pub fn stop_speaking(&self) {
        self.playback.stop();
        let changed = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.speaking, false).then_some(state.typing)
        };
        if let Some(typing) = changed {
            self.events.activity(typing, false, None);
        }
    }

    /// Flip speech output; turning it off also stops current speech.
    /// Returns the new setting.
    pub fn toggle_speech(&self) -> bool {
        let enabled = {
            let mut state = self.state.lock();
            state.speech_enabled = !state.speech_enabled;
            state.speech_enabled
        };
        if !enabled {
            self.stop_speaking();
        }
        info!(enabled, "speech output toggled");
        enabled
    }

    /// Markdown coaching analysis of a conversation screenshot.
    ///
    /// # Errors
    /// Propagates backend failures.
    pub async fn analyze_image(
        &self,
        image_b64: &str,
        mime_type: &str,
        context: Option<&str>,
    ) -> Result<String> {
        info!(mime_type, bytes = image_b64.len(), "screenshot analysis requested");
        self.backend
            .image_analyze(image_b64, mime_type, context)
            .await
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        self.state.lock().snapshot()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn playback(&self) -> &PlaybackSession {
        &self.playback
    }

    /// Subscribe to transcript, emotion and session events.
    pub fn subscribe_conversation(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.conversation_tx.subscribe()
    }

    /// Subscribe to typing / speaking indicator changes.
    pub fn subscribe_activity(&self) -> broadcast::Receiver<ActivityEvent> {
        self.events.activity_tx.subscribe()
    }

    /// Snapshot of turn counters for observability.
    pub fn turn_diagnostics_snapshot(&self) -> TurnSnapshot {
        self.diagnostics.snapshot()
    }

    pub fn playback_diagnostics_snapshot(&self) -> PlaybackSnapshot {
        self.playback.diagnostics()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn turn_context(&self, generation: u64) -> TurnContext<B> {
        TurnContext {
            config: self.config.clone(),
            backend: Arc::clone(&self.backend),
            state: Arc::clone(&self.state),
            playback: self.playback.clone(),
            events: self.events.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
            generation,
        }
    }
}
