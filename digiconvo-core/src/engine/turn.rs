//! Per-turn tasks: tone analysis, scenario reply and reply speech.
//!
//! Each submitted message spawns two tasks that share nothing but the
//! conversation state lock. Neither waits on the other; a failure in one
//! never reaches the other.
//!
//! Every task carries the state generation it was dispatched under and drops
//! its result if the generation moved on (new session or cleared chat).

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

use super::EngineConfig;
use crate::{
    backend::{AudioPayload, ChatTurn, ConversationBackend},
    conversation::{ConversationState, Message, Scenario},
    ipc::events::{ActivityEvent, ConversationEvent, ConversationEventKind},
    playback::{PlaybackOutcome, PlaybackSession},
};

/// Counters for turn observability.
#[derive(Default)]
pub struct TurnDiagnostics {
    pub turns_submitted: AtomicUsize,
    pub tone_resolved: AtomicUsize,
    pub tone_failed: AtomicUsize,
    pub replies_resolved: AtomicUsize,
    pub replies_failed: AtomicUsize,
    pub stale_discarded: AtomicUsize,
    pub speech_started: AtomicUsize,
}

impl TurnDiagnostics {
    pub fn snapshot(&self) -> TurnSnapshot {
        TurnSnapshot {
            turns_submitted: self.turns_submitted.load(Ordering::Relaxed),
            tone_resolved: self.tone_resolved.load(Ordering::Relaxed),
            tone_failed: self.tone_failed.load(Ordering::Relaxed),
            replies_resolved: self.replies_resolved.load(Ordering::Relaxed),
            replies_failed: self.replies_failed.load(Ordering::Relaxed),
            stale_discarded: self.stale_discarded.load(Ordering::Relaxed),
            speech_started: self.speech_started.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnSnapshot {
    pub turns_submitted: usize,
    pub tone_resolved: usize,
    pub tone_failed: usize,
    pub replies_resolved: usize,
    pub replies_failed: usize,
    pub stale_discarded: usize,
    pub speech_started: usize,
}

/// Join handles for the two tasks of one turn.
#[derive(Debug)]
pub struct TurnHandle {
    pub tone: JoinHandle<()>,
    pub reply: JoinHandle<()>,
}

impl TurnHandle {
    /// Wait for both tasks. Panicked tasks are logged, not propagated.
    pub async fn join(self) {
        let (tone, reply) = tokio::join!(self.tone, self.reply);
        if let Err(e) = tone {
            warn!("tone analysis task ended abnormally: {e}");
        }
        if let Err(e) = reply {
            warn!("scenario reply task ended abnormally: {e}");
        }
    }
}

/// Broadcast senders plus the shared sequence counter.
#[derive(Clone)]
pub(crate) struct EventBus {
    pub conversation_tx: broadcast::Sender<ConversationEvent>,
    pub activity_tx: broadcast::Sender<ActivityEvent>,
    pub seq: Arc<AtomicU64>,
}

impl EventBus {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn conversation(&self, session_id: &str, kind: ConversationEventKind) {
        let _ = self.conversation_tx.send(ConversationEvent {
            seq: self.next_seq(),
            session_id: session_id.to_string(),
            kind,
        });
    }

    pub fn activity(&self, typing: bool, speaking: bool, playback: Option<PlaybackOutcome>) {
        let _ = self.activity_tx.send(ActivityEvent {
            seq: self.next_seq(),
            typing,
            speaking,
            playback,
        });
    }
}

/// Everything a turn task needs, cloned out of the engine at dispatch.
pub(crate) struct TurnContext<B> {
    pub config: EngineConfig,
    pub backend: Arc<B>,
    pub state: Arc<Mutex<ConversationState>>,
    pub playback: PlaybackSession,
    pub events: EventBus,
    pub diagnostics: Arc<TurnDiagnostics>,
    /// State generation at dispatch.
    pub generation: u64,
}

impl<B> Clone for TurnContext<B> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            backend: Arc::clone(&self.backend),
            state: Arc::clone(&self.state),
            playback: self.playback.clone(),
            events: self.events.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
            generation: self.generation,
        }
    }
}

impl<B: ConversationBackend> TurnContext<B> {
    pub async fn run_tone(self, message_id: String, text: String) {
        let analysis = match self.backend.tone_analysis(&text).await {
            Ok(analysis) => analysis,
            Err(e) => {
                self.diagnostics.tone_failed.fetch_add(1, Ordering::Relaxed);
                warn!(message_id, "tone analysis failed: {e}");
                return;
            }
        };

        let session_id = {
            let mut state = self.state.lock();
            if state.generation != self.generation {
                None
            } else {
                state.apply_emotion(&message_id, analysis.clone());
                Some(state.session_id.clone())
            }
        };

        let Some(session_id) = session_id else {
            self.discard_stale("tone analysis");
            return;
        };

        self.diagnostics.tone_resolved.fetch_add(1, Ordering::Relaxed);
        debug!(
            message_id,
            emotion = %analysis.primary_emotion,
            intensity = analysis.intensity,
            "tone analysis applied"
        );
        self.events.conversation(
            &session_id,
            ConversationEventKind::EmotionUpdated {
                message_id,
                analysis,
            },
        );
    }

    pub async fn run_reply(self, history: Vec<ChatTurn>, scenario: Scenario) {
        let (text, audio) = match self.backend.scenario_reply(&history, &scenario).await {
            Ok(reply) => {
                self.diagnostics.replies_resolved.fetch_add(1, Ordering::Relaxed);
                (reply.reply, reply.audio)
            }
            Err(e) => {
                self.diagnostics.replies_failed.fetch_add(1, Ordering::Relaxed);
                warn!(scenario = %scenario.id, "scenario reply failed: {e}");
                (self.config.fallback_reply.clone(), None)
            }
        };

        let applied = {
            let mut state = self.state.lock();
            if state.generation != self.generation {
                None
            } else {
                let message = Message::ai(text);
                state.messages.push(message.clone());
                state.typing = false;
                let speech = audio.filter(|_| state.speech_enabled);
                if speech.is_some() {
                    state.speaking = true;
                }
                Some((message, speech, state.session_id.clone(), state.speaking))
            }
        };

        let Some((message, speech, session_id, speaking)) = applied else {
            self.discard_stale("scenario reply");
            return;
        };

        info!(message_id = %message.id, with_audio = speech.is_some(), "reply appended");
        self.events
            .conversation(&session_id, ConversationEventKind::MessageAppended { message });
        self.events.activity(false, speaking, None);

        if let Some(audio) = speech {
            // Device setup blocks until the output stream is open.
            let ctx = self.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || speak(&ctx, &audio)).await {
                warn!("speech task ended abnormally: {e}");
                self.clear_speaking(None);
            }
        }
    }

    /// Clear `speaking` if this turn's session is still current, and emit the
    /// change. Returns false when the session has moved on.
    fn clear_speaking(&self, outcome: Option<PlaybackOutcome>) -> bool {
        clear_speaking(&self.state, &self.events, self.generation, outcome)
    }

    fn discard_stale(&self, what: &str) {
        self.diagnostics.stale_discarded.fetch_add(1, Ordering::Relaxed);
        debug!(generation = self.generation, "{what} arrived after the session changed; discarded");
    }
}

/// Hand reply audio to the playback session; `speaking` clears when it ends.
/// Runs on a blocking thread.
fn speak<B>(ctx: &TurnContext<B>, audio: &AudioPayload) {
    ctx.diagnostics.speech_started.fetch_add(1, Ordering::Relaxed);

    let state = Arc::clone(&ctx.state);
    let events = ctx.events.clone();
    let generation = ctx.generation;
    let started = ctx.playback.play(&audio.data, &audio.mime_type, move |outcome| {
        // A superseding clip has already claimed the indicator.
        if outcome == PlaybackOutcome::Superseded {
            return;
        }
        if let PlaybackOutcome::Failed(reason) = &outcome {
            warn!("AI stopped speaking: {reason}");
        }
        clear_speaking(&state, &events, generation, Some(outcome));
    });

    // The session may have changed while the clip was being set up; its
    // teardown ran before this clip existed, so cut it off here.
    let Some(clip_generation) = started else {
        return;
    };
    if ctx.state.lock().generation != ctx.generation
        && ctx.playback.stop_generation(clip_generation)
    {
        ctx.diagnostics.stale_discarded.fetch_add(1, Ordering::Relaxed);
        debug!(generation = ctx.generation, "speech for an abandoned session stopped");
    }
}

fn clear_speaking(
    state: &Mutex<ConversationState>,
    events: &EventBus,
    generation: u64,
    outcome: Option<PlaybackOutcome>,
) -> bool {
    let typing = {
        let mut state = state.lock();
        if state.generation != generation {
            return false;
        }
        state.speaking = false;
        state.typing
    };
    events.activity(typing, false, outcome);
    true
}
