//! `GeminiBackend`: Gemini `generateContent` over HTTPS.
//!
//! Three model roles:
//!
//! | Role | Default model | Used for |
//! |------|---------------|----------|
//! | chat | `gemini-1.5-flash` | tone analysis (JSON mode), persona replies |
//! | tts | `gemini-2.5-flash-preview-tts` | speech for replies |
//! | vision | `gemini-1.5-flash` | screenshot analysis |
//!
//! A reply is produced in two calls: the chat model writes the text, then the
//! TTS model voices it with the persona's prebuilt voice. If the second call
//! fails the text reply is still returned, without audio.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{prompts, AudioPayload, ChatTurn, ConversationBackend, ScenarioReply};
use crate::conversation::{EmotionAnalysis, EmotionLabel, Scenario};
use crate::error::{ConvoError, Result};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_CHAT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";
pub const DEFAULT_VISION_MODEL: &str = "gemini-1.5-flash";
pub const NO_ANALYSIS: &str = "AI could not provide analysis";

/// Connection settings for [`GeminiBackend`].
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub tts_model: String,
    pub vision_model: String,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.into(),
            chat_model: DEFAULT_CHAT_MODEL.into(),
            tts_model: DEFAULT_TTS_MODEL.into(),
            vision_model: DEFAULT_VISION_MODEL.into(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl GeminiConfig {
    /// Defaults overridden by `GEMINI_API_KEY`, `DIGICONVO_CHAT_MODEL`,
    /// `DIGICONVO_TTS_MODEL` and `DIGICONVO_VISION_MODEL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overwrite fields from any non-empty environment variables.
    pub fn apply_env(&mut self) {
        let read = |key: &str| {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        if let Some(key) = read("GEMINI_API_KEY") {
            self.api_key = key;
        }
        if let Some(model) = read("DIGICONVO_CHAT_MODEL") {
            self.chat_model = model;
        }
        if let Some(model) = read("DIGICONVO_TTS_MODEL") {
            self.tts_model = model;
        }
        if let Some(model) = read("DIGICONVO_VISION_MODEL") {
            self.vision_model = model;
        }
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

pub struct GeminiBackend {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiBackend {
    /// # Errors
    /// Returns `ConvoError::Backend` without an API key, or
    /// `ConvoError::Http` if the HTTP client cannot be built.
    pub fn new(config: GeminiConfig) -> Result<Self> {
        if !config.has_api_key() {
            return Err(ConvoError::Backend(
                "GEMINI_API_KEY is not set".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConvoError::Http(e.to_string()))?;
        info!(
            chat = %config.chat_model,
            tts = %config.tts_model,
            vision = %config.vision_model,
            "gemini backend ready"
        );
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    async fn generate(&self, model: &str, request: &GenerateRequest<'_>) -> Result<GenerateResponse> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        );
        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| ConvoError::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ConvoError::Http(e.to_string()))?;
        debug!(model, %status, bytes = body.len(), "gemini response");

        if !status.is_success() {
            return Err(ConvoError::Http(format!(
                "gemini {model} returned {status}: {}",
                truncate(&body, 300)
            )));
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn synthesize(&self, persona_name: &str, voice_name: &str, text: &str) -> Result<AudioPayload> {
        let prompt = prompts::speech(persona_name, text);
        let request = GenerateRequest {
            contents: vec![Content::text(None, &prompt)],
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["AUDIO"]),
                speech_config: Some(json!({
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice_name } }
                })),
                ..Default::default()
            }),
        };
        let response = self.generate(&self.config.tts_model, &request).await?;
        let inline = response
            .first_inline_data()
            .ok_or_else(|| ConvoError::MalformedResponse("no audio in TTS response".into()))?;
        debug!(mime = ?inline.mime_type, "speech synthesized");
        Ok(AudioPayload {
            data: inline.data.clone(),
            mime_type: inline
                .mime_type
                .clone()
                .unwrap_or_else(|| "audio/L16;codec=pcm;rate=24000".into()),
        })
    }
}

impl ConversationBackend for GeminiBackend {
    async fn tone_analysis(&self, text: &str) -> Result<EmotionAnalysis> {
        let prompt = prompts::tone_analysis(text);
        let request = GenerateRequest {
            contents: vec![Content::text(Some("user"), &prompt)],
            generation_config: Some(GenerationConfig {
                response_mime_type: Some("application/json"),
                response_schema: Some(tone_schema()),
                ..Default::default()
            }),
        };
        let response = self.generate(&self.config.chat_model, &request).await?;
        let raw = response
            .text()
            .ok_or_else(|| ConvoError::MalformedResponse("empty tone analysis".into()))?;
        parse_tone_json(&raw)
    }

    async fn scenario_reply(&self, history: &[ChatTurn], scenario: &Scenario) -> Result<ScenarioReply> {
        let prompt = prompts::scenario_reply(history, scenario);
        let request = GenerateRequest {
            contents: vec![Content::text(Some("user"), &prompt)],
            generation_config: None,
        };
        let response = self.generate(&self.config.chat_model, &request).await?;
        let reply = response
            .first_text()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ConvoError::Backend("AI failed to generate a text reply".into()))?;

        let persona = &scenario.persona;
        let speech = self.synthesize(&persona.name, &persona.voice_name, &reply).await;
        Ok(with_speech(reply, speech, &persona.voice_name))
    }

    async fn image_analyze(&self, image_b64: &str, mime_type: &str, context: Option<&str>) -> Result<String> {
        let prompt = prompts::image_analysis(context);
        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part::inline(mime_type, image_b64), Part::text(&prompt)],
            }],
            generation_config: None,
        };
        let response = self.generate(&self.config.vision_model, &request).await?;
        Ok(response
            .text()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| NO_ANALYSIS.to_string()))
    }
}

/// Attach synthesized speech to a reply. A synthesis failure leaves the reply
/// text-only.
fn with_speech(reply: String, speech: Result<AudioPayload>, voice_name: &str) -> ScenarioReply {
    let audio = match speech {
        Ok(audio) => Some(audio),
        Err(e) => {
            warn!(voice = %voice_name, "speech synthesis failed, replying without audio: {e}");
            None
        }
    };
    ScenarioReply { reply, audio }
}

fn tone_schema() -> Value {
    let labels: Vec<&str> = EmotionLabel::ALL.iter().map(|l| l.as_str()).collect();
    json!({
        "type": "OBJECT",
        "properties": {
            "primaryEmotion": { "type": "STRING", "enum": labels },
            "intensity": { "type": "NUMBER" },
            "confidence": { "type": "NUMBER" },
            "suggestions": { "type": "ARRAY", "items": { "type": "STRING" } }
        },
        "required": ["primaryEmotion", "intensity", "confidence", "suggestions"]
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTone {
    primary_emotion: EmotionLabel,
    intensity: f64,
    confidence: f64,
    #[serde(default)]
    suggestions: Vec<String>,
}

/// Parse the JSON-mode tone answer, tolerating a markdown code fence.
pub fn parse_tone_json(raw: &str) -> Result<EmotionAnalysis> {
    let body = strip_code_fence(raw);
    let tone: RawTone = serde_json::from_str(body)?;
    Ok(EmotionAnalysis::new(
        tone.primary_emotion,
        tone.intensity,
        tone.confidence,
        tone.suggestions,
    ))
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

impl<'a> Content<'a> {
    fn text(role: Option<&'a str>, text: &'a str) -> Self {
        Self {
            role,
            parts: vec![Part::text(text)],
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Part<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineDataOut<'a>>,
}

impl<'a> Part<'a> {
    fn text(text: &'a str) -> Self {
        Self {
            text: Some(text),
            inline_data: None,
        }
    }

    fn inline(mime_type: &'a str, data: &'a str) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineDataOut { mime_type, data }),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineDataOut<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<Value>,
}

#[derive(Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineDataIn>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineDataIn {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

impl GenerateResponse {
    fn first_parts(&self) -> &[ResponsePart] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or(&[])
    }

    /// Text of the first part of the first candidate.
    fn first_text(&self) -> Option<&str> {
        self.first_parts().first().and_then(|p| p.text.as_deref())
    }

    /// All text parts of the first candidate, concatenated.
    fn text(&self) -> Option<String> {
        let joined: String = self
            .first_parts()
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        (!joined.is_empty()).then_some(joined)
    }

    fn first_inline_data(&self) -> Option<&InlineDataIn> {
        self.first_parts().iter().find_map(|p| p.inline_data.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_fenced_tone_json() {
        let plain = r#"{"primaryEmotion":"Frustrated","intensity":7,"confidence":82.5,"suggestions":["Pause before replying."]}"#;
        let analysis = parse_tone_json(plain).unwrap();
        assert_eq!(analysis.primary_emotion, EmotionLabel::Frustrated);
        assert_eq!(analysis.color, "#DC2626");
        assert_eq!(analysis.intensity, 7);
        assert_eq!(analysis.confidence, 83);

        let fenced = format!("```json\n{plain}\n```");
        assert_eq!(parse_tone_json(&fenced).unwrap(), analysis);
    }

    #[test]
    fn unknown_tone_label_gets_neutral_color() {
        let raw = r#"{"primaryEmotion":"Wistful","intensity":3,"confidence":40,"suggestions":[]}"#;
        let analysis = parse_tone_json(raw).unwrap();
        assert_eq!(analysis.primary_emotion, EmotionLabel::Neutral);
        assert_eq!(analysis.color, "#9CA3AF");
    }

    #[test]
    fn malformed_tone_json_is_an_error() {
        assert!(matches!(
            parse_tone_json("I think they sound sad."),
            Err(ConvoError::MalformedResponse(_))
        ));
    }

    #[test]
    fn request_serializes_in_camel_case() {
        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part::inline("image/png", "AAAA"), Part::text("look")],
            }],
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["AUDIO"]),
                ..Default::default()
            }),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(json["contents"][0]["parts"][1]["text"], "look");
        assert!(json["contents"][0]["parts"][1].get("inlineData").is_none());
        assert_eq!(json["generationConfig"]["responseModalities"][0], "AUDIO");
        assert!(json["generationConfig"].get("responseSchema").is_none());
    }

    #[test]
    fn response_accessors_find_text_and_audio() {
        let body = r#"{"candidates":[{"content":{"parts":[
            {"inlineData":{"mimeType":"audio/L16;codec=pcm;rate=24000","data":"AAE="}}
        ]}}]}"#;
        let response: GenerateResponse = serde_json::from_str(body).unwrap();
        assert!(response.first_text().is_none());
        let inline = response.first_inline_data().unwrap();
        assert_eq!(inline.data, "AAE=");
        assert_eq!(inline.mime_type.as_deref(), Some("audio/L16;codec=pcm;rate=24000"));

        let empty: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.text().is_none());
    }

    #[test]
    fn failed_synthesis_keeps_the_reply_text() {
        let degraded = with_speech(
            "I hear you.".into(),
            Err(ConvoError::Http("503 Service Unavailable".into())),
            "Leda",
        );
        assert_eq!(degraded.reply, "I hear you.");
        assert!(degraded.audio.is_none());

        let spoken = with_speech(
            "I hear you.".into(),
            Ok(AudioPayload {
                data: "AAE=".into(),
                mime_type: "audio/L16;codec=pcm;rate=24000".into(),
            }),
            "Leda",
        );
        assert_eq!(spoken.audio.map(|a| a.data).as_deref(), Some("AAE="));
    }

    #[test]
    fn backend_requires_an_api_key() {
        assert!(matches!(
            GeminiBackend::new(GeminiConfig::default()),
            Err(ConvoError::Backend(_))
        ));
    }
}
