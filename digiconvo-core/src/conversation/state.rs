//! Mutable per-session conversation state.
//!
//! Only `ConversationEngine` mutates this; everything else reads snapshots.
//! The transcript and emotion history are append-only within a session and
//! are cleared only when a new session starts or the chat is cleared, both of
//! which bump `generation`.

use serde::{Deserialize, Serialize};

use super::{new_session_id, EmotionAnalysis, Message, MessageEmotion, Scenario};

#[derive(Debug, Clone)]
pub struct ConversationState {
    pub scenario: Option<Scenario>,
    pub session_id: String,
    /// Bumped whenever the transcript is reset; in-flight turns from an older
    /// generation are discarded.
    pub generation: u64,
    pub messages: Vec<Message>,
    pub current_emotion: Option<EmotionAnalysis>,
    pub emotion_history: Vec<EmotionAnalysis>,
    pub typing: bool,
    pub speaking: bool,
    pub speech_enabled: bool,
}

impl ConversationState {
    pub fn new(speech_enabled: bool) -> Self {
        Self {
            scenario: None,
            session_id: new_session_id(),
            generation: 0,
            messages: Vec::new(),
            current_emotion: None,
            emotion_history: Vec::new(),
            typing: false,
            speaking: false,
            speech_enabled,
        }
    }

    /// Switch to `scenario` with a fresh session id and empty transcript.
    pub fn begin_session(&mut self, scenario: Scenario) -> u64 {
        self.scenario = Some(scenario);
        self.session_id = new_session_id();
        self.reset_transcript()
    }

    /// Drop the transcript and emotions, keeping scenario and session id.
    pub fn reset_transcript(&mut self) -> u64 {
        self.messages.clear();
        self.current_emotion = None;
        self.emotion_history.clear();
        self.typing = false;
        self.speaking = false;
        self.generation += 1;
        self.generation
    }

    /// Record a resolved tone analysis and annotate the analyzed message.
    pub fn apply_emotion(&mut self, message_id: &str, analysis: EmotionAnalysis) {
        if let Some(msg) = self.messages.iter_mut().find(|m| m.id == message_id) {
            msg.emotion = Some(MessageEmotion::from(&analysis));
        }
        self.emotion_history.push(analysis.clone());
        self.current_emotion = Some(analysis);
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            scenario_id: self.scenario.as_ref().map(|s| s.id.clone()),
            session_id: self.session_id.clone(),
            generation: self.generation,
            messages: self.messages.clone(),
            current_emotion: self.current_emotion.clone(),
            emotion_history: self.emotion_history.clone(),
            typing: self.typing,
            speaking: self.speaking,
            speech_enabled: self.speech_enabled,
        }
    }
}

/// Read-only copy of the conversation for display and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSnapshot {
    pub scenario_id: Option<String>,
    pub session_id: String,
    pub generation: u64,
    pub messages: Vec<Message>,
    pub current_emotion: Option<EmotionAnalysis>,
    pub emotion_history: Vec<EmotionAnalysis>,
    pub typing: bool,
    pub speaking: bool,
    pub speech_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{scenario, EmotionLabel};

    #[test]
    fn begin_session_resets_everything_and_bumps_generation() {
        let mut state = ConversationState::new(true);
        let first_session = state.session_id.clone();
        state.messages.push(Message::user("hello"));
        state.typing = true;

        let generation = state.begin_session(scenario::find("1").unwrap().clone());

        assert_eq!(generation, 1);
        assert!(state.messages.is_empty());
        assert!(!state.typing);
        assert_ne!(state.session_id, first_session);
        assert_eq!(state.snapshot().scenario_id.as_deref(), Some("1"));
    }

    #[test]
    fn apply_emotion_annotates_and_appends() {
        let mut state = ConversationState::new(true);
        let msg = Message::user("I'm upset");
        let id = msg.id.clone();
        state.messages.push(msg);

        state.apply_emotion(&id, EmotionAnalysis::new(EmotionLabel::Sad, 7.0, 90.0, vec![]));
        state.apply_emotion(&id, EmotionAnalysis::new(EmotionLabel::Angry, 5.0, 60.0, vec![]));

        assert_eq!(state.emotion_history.len(), 2);
        assert_eq!(
            state.current_emotion.as_ref().map(|e| e.primary_emotion),
            Some(EmotionLabel::Angry)
        );
        let tone = state.messages[0].emotion.as_ref().map(|e| e.tone);
        assert_eq!(tone, Some(EmotionLabel::Angry));
    }
}
