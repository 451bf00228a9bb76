//! Conversation domain: messages, emotions, the scenario catalog and the
//! per-session state owned by `ConversationEngine`.

pub mod emotion;
pub mod scenario;
pub mod state;

pub use emotion::{EmotionAnalysis, EmotionLabel};
pub use scenario::{Difficulty, Gender, Persona, Scenario};
pub use state::{ConversationSnapshot, ConversationState};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

impl Sender {
    pub fn as_str(self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Ai => "ai",
        }
    }
}

/// Tone annotation attached to a user message once analysis resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEmotion {
    pub tone: EmotionLabel,
    pub intensity: u8,
    pub color: String,
}

impl From<&EmotionAnalysis> for MessageEmotion {
    fn from(analysis: &EmotionAnalysis) -> Self {
        Self {
            tone: analysis.primary_emotion,
            intensity: analysis.intensity,
            color: analysis.color.clone(),
        }
    }
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender: Sender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<MessageEmotion>,
}

impl Message {
    pub fn new(sender: Sender, content: impl Into<String>) -> Self {
        let timestamp = Utc::now();
        Self {
            id: new_message_id(&timestamp),
            sender,
            content: content.into(),
            timestamp,
            emotion: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Sender::User, content)
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(Sender::Ai, content)
    }
}

/// `msg-<unix millis>-<8 hex digits>`.
fn new_message_id(at: &DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("msg-{}-{suffix:08x}", at.timestamp_millis())
}

/// `session-<unix millis>-<8 hex digits>`.
pub(crate) fn new_session_id() -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("session-{}-{suffix:08x}", Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_prefixed_and_distinct() {
        let a = Message::user("hi");
        let b = Message::user("hi");
        assert!(a.id.starts_with("msg-"));
        assert_eq!(a.id.split('-').count(), 3);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn message_serializes_camel_case_without_empty_emotion() {
        let msg = Message::ai("I understand.");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["sender"], "ai");
        assert_eq!(json["content"], "I understand.");
        assert!(json.get("emotion").is_none());
    }
}
