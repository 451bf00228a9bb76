//! Generative-AI backend abstraction.
//!
//! The `ConversationBackend` trait decouples turn orchestration from the
//! service that produces analyses, replies and speech. `GeminiBackend` talks to
//! the Gemini REST API; tests plug in scripted backends.
//!
//! Methods take `&self` and return `Send` futures so the engine can run tone
//! analysis and the scenario reply as independent tokio tasks over one shared
//! `Arc<B>`.

pub mod prompts;

#[cfg(feature = "gemini")]
pub mod gemini;

#[cfg(feature = "gemini")]
pub use gemini::{GeminiBackend, GeminiConfig};

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::conversation::{EmotionAnalysis, Message, Scenario, Sender};
use crate::error::Result;

/// One line of conversation history as sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub sender: Sender,
    pub content: String,
}

impl From<&Message> for ChatTurn {
    fn from(msg: &Message) -> Self {
        Self {
            sender: msg.sender,
            content: msg.content.clone(),
        }
    }
}

/// Synthesized speech for a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioPayload {
    /// Base64 PCM, signed 16-bit little-endian mono.
    pub data: String,
    /// Descriptor such as `audio/L16;codec=pcm;rate=24000`.
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReply {
    pub reply: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioPayload>,
}

impl ScenarioReply {
    pub fn text(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            audio: None,
        }
    }
}

/// Contract for generative-AI backends.
pub trait ConversationBackend: Send + Sync + 'static {
    /// Classify the emotional tone of one user message.
    fn tone_analysis(&self, text: &str) -> impl Future<Output = Result<EmotionAnalysis>> + Send;

    /// Produce the persona's next line, optionally with synthesized speech.
    ///
    /// `history` ends with the user's latest message.
    fn scenario_reply(
        &self,
        history: &[ChatTurn],
        scenario: &Scenario,
    ) -> impl Future<Output = Result<ScenarioReply>> + Send;

    /// Coach-style markdown analysis of a conversation screenshot.
    fn image_analyze(
        &self,
        image_b64: &str,
        mime_type: &str,
        context: Option<&str>,
    ) -> impl Future<Output = Result<String>> + Send;
}
