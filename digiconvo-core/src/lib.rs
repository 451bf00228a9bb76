//! # digiconvo-core
//!
//! Conversation-practice engine SDK: persona chat turns, tone analysis and
//! spoken AI replies.
//!
//! ## Architecture
//!
//! ```text
//! submit(text) ─► user echo ─┬─► ConversationBackend::tone_analysis ─► EmotionUpdated
//!                            └─► ConversationBackend::scenario_reply ─► AI message
//!                                                                   │
//!                                           base64 PCM ─► codec ─► WAV
//!                                                                   │
//!                                            PlaybackSession (single slot)
//!                                                                   │
//!                                            PlaybackEngine (cpal | timed)
//! ```
//!
//! Events reach the host over `tokio::sync::broadcast` channels.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod backend;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod playback;

// Convenience re-exports for downstream crates
pub use audio::AudioChunk;
pub use backend::{AudioPayload, ChatTurn, ConversationBackend, ScenarioReply};
pub use conversation::{
    ConversationSnapshot, EmotionAnalysis, EmotionLabel, Message, Scenario, Sender,
};
pub use engine::{ConversationEngine, EngineConfig, TurnHandle, FALLBACK_REPLY};
pub use error::{ConvoError, Result};
pub use ipc::events::{ActivityEvent, ConversationEvent, ConversationEventKind};
pub use playback::{PlaybackEngine, PlaybackOutcome, PlaybackSession, TimedEngine};

#[cfg(feature = "gemini")]
pub use backend::{GeminiBackend, GeminiConfig};

#[cfg(feature = "audio-cpal")]
pub use playback::CpalEngine;
