//! Emotion labels and tone analysis results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Primary emotion reported by tone analysis.
///
/// Deserialization is total: labels outside the table map to `Neutral`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EmotionLabel {
    Happy,
    Sad,
    Angry,
    Anxious,
    Empathetic,
    Frustrated,
    Calm,
    Excited,
    Neutral,
}

impl EmotionLabel {
    pub const ALL: [EmotionLabel; 9] = [
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Angry,
        EmotionLabel::Anxious,
        EmotionLabel::Empathetic,
        EmotionLabel::Frustrated,
        EmotionLabel::Calm,
        EmotionLabel::Excited,
        EmotionLabel::Neutral,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EmotionLabel::Happy => "Happy",
            EmotionLabel::Sad => "Sad",
            EmotionLabel::Angry => "Angry",
            EmotionLabel::Anxious => "Anxious",
            EmotionLabel::Empathetic => "Empathetic",
            EmotionLabel::Frustrated => "Frustrated",
            EmotionLabel::Calm => "Calm",
            EmotionLabel::Excited => "Excited",
            EmotionLabel::Neutral => "Neutral",
        }
    }

    /// Display color as `#RRGGBB`.
    pub fn color(self) -> &'static str {
        match self {
            EmotionLabel::Happy => "#10B981",
            EmotionLabel::Sad => "#6B7280",
            EmotionLabel::Angry => "#EF4444",
            EmotionLabel::Anxious => "#F59E0B",
            EmotionLabel::Empathetic => "#3B82F6",
            EmotionLabel::Frustrated => "#DC2626",
            EmotionLabel::Calm => "#059669",
            EmotionLabel::Excited => "#8B5CF6",
            EmotionLabel::Neutral => "#9CA3AF",
        }
    }

    /// Case-insensitive lookup; anything unrecognized is `Neutral`.
    pub fn parse_lenient(label: &str) -> Self {
        label.parse().unwrap_or(EmotionLabel::Neutral)
    }
}

impl FromStr for EmotionLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        EmotionLabel::ALL
            .into_iter()
            .find(|label| label.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("unknown emotion label: {trimmed}"))
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EmotionLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(EmotionLabel::parse_lenient(&raw))
    }
}

/// Result of one tone analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionAnalysis {
    pub primary_emotion: EmotionLabel,
    /// 1 (very mild) to 10 (extremely intense).
    pub intensity: u8,
    /// 0 to 100.
    pub confidence: u8,
    pub suggestions: Vec<String>,
    pub color: String,
}

impl EmotionAnalysis {
    /// Build an analysis from raw model output, clamping the scales and
    /// deriving the color from the label.
    pub fn new(
        primary_emotion: EmotionLabel,
        intensity: f64,
        confidence: f64,
        suggestions: Vec<String>,
    ) -> Self {
        Self {
            primary_emotion,
            intensity: clamp_scale(intensity, 1.0, 10.0),
            confidence: clamp_scale(confidence, 0.0, 100.0),
            suggestions,
            color: primary_emotion.color().to_string(),
        }
    }
}

fn clamp_scale(value: f64, min: f64, max: f64) -> u8 {
    if value.is_nan() {
        return min as u8;
    }
    value.round().clamp(min, max) as u8
}
