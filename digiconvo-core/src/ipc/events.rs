//! Event types broadcast by `ConversationEngine`.
//!
//! ## Channels
//!
//! | Event | Channel |
//! |-------|---------|
//! | `ConversationEvent` | `"digiconvo://conversation"` |
//! | `ActivityEvent` | `"digiconvo://activity"` |
//!
//! Hosts subscribe through `ConversationEngine::subscribe_conversation` and
//! `subscribe_activity`; the JSON shapes below are what a UI layer receives.

use serde::{Deserialize, Serialize};

use crate::conversation::{EmotionAnalysis, Message};
use crate::playback::PlaybackOutcome;

pub const CONVERSATION_CHANNEL: &str = "digiconvo://conversation";
pub const ACTIVITY_CHANNEL: &str = "digiconvo://activity";

// ---------------------------------------------------------------------------
// Conversation events
// ---------------------------------------------------------------------------

/// Emitted when the transcript, emotion history or session changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEvent {
    /// Monotonically increasing event sequence number, shared across channels.
    pub seq: u64,
    pub session_id: String,
    pub kind: ConversationEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ConversationEventKind {
    /// A user echo, AI reply or fallback apology was appended.
    MessageAppended { message: Message },
    /// Tone analysis resolved for `message_id`.
    EmotionUpdated {
        message_id: String,
        analysis: EmotionAnalysis,
    },
    /// A new scenario session began; the transcript is empty.
    SessionStarted { scenario_id: String },
    /// The transcript was cleared within the current session.
    TranscriptCleared,
}

// ---------------------------------------------------------------------------
// Activity events
// ---------------------------------------------------------------------------

/// Emitted whenever the typing or speaking indicator changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub seq: u64,
    /// The AI is composing a reply.
    pub typing: bool,
    /// AI speech is playing.
    pub speaking: bool,
    /// Why speech ended, on the event that clears `speaking`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback: Option<PlaybackOutcome>,
}
