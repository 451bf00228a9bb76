//! Built-in practice scenarios and their AI personas.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{ConvoError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Gender {
    Male,
    Female,
    Neutral,
}

/// The character the AI plays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub name: String,
    pub personality: String,
    pub emotional_tendency: String,
    pub gender: Gender,
    /// Prebuilt TTS voice used for this persona's replies.
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub difficulty: Difficulty,
    pub persona: Persona,
}

#[allow(clippy::too_many_arguments)]
fn entry(
    id: &str,
    title: &str,
    description: &str,
    category: &str,
    difficulty: Difficulty,
    (name, personality, emotional_tendency): (&str, &str, &str),
    gender: Gender,
    voice_name: &str,
) -> Scenario {
    Scenario {
        id: id.into(),
        title: title.into(),
        description: description.into(),
        category: category.into(),
        difficulty,
        persona: Persona {
            name: name.into(),
            personality: personality.into(),
            emotional_tendency: emotional_tendency.into(),
            gender,
            voice_name: voice_name.into(),
        },
    }
}

/// All built-in scenarios, in display order.
pub fn catalog() -> &'static [Scenario] {
    static CATALOG: OnceLock<Vec<Scenario>> = OnceLock::new();
    CATALOG.get_or_init(|| {
        vec![
            entry(
                "1",
                "Relationship Breakup",
                "Practice ending a romantic relationship with empathy and clarity",
                "Personal",
                Difficulty::Hard,
                (
                    "Alex",
                    "Emotional and defensive",
                    "Becomes upset easily, seeks reassurance",
                ),
                Gender::Neutral,
                "Zephyr",
            ),
            entry(
                "2",
                "Performance Review",
                "Give constructive feedback to an underperforming employee",
                "Professional",
                Difficulty::Medium,
                (
                    "Jordan",
                    "Professional but sensitive",
                    "Takes criticism personally, needs encouragement",
                ),
                Gender::Male,
                "Charon",
            ),
            entry(
                "3",
                "Friend Conflict",
                "Address a betrayal or misunderstanding with a close friend",
                "Social",
                Difficulty::Medium,
                (
                    "Sam",
                    "Stubborn but caring",
                    "Defensive initially, becomes understanding over time",
                ),
                Gender::Neutral,
                "Puck",
            ),
            entry(
                "4",
                "Family Disagreement",
                "Navigate a heated family discussion about important decisions",
                "Family",
                Difficulty::Hard,
                (
                    "Casey",
                    "Traditional and protective",
                    "Values family harmony, fears change",
                ),
                Gender::Female,
                "Leda",
            ),
            entry(
                "5",
                "Team Conflict Resolution",
                "Mediate between two team members who are not getting along",
                "Professional",
                Difficulty::Medium,
                (
                    "Taylor",
                    "Analytical but frustrated",
                    "Wants logical solutions, struggles with interpersonal dynamics",
                ),
                Gender::Female,
                "Aoede",
            ),
            entry(
                "6",
                "Difficult Customer",
                "Handle a frustrated customer with professionalism and empathy",
                "Professional",
                Difficulty::Easy,
                (
                    "Morgan",
                    "Demanding but reasonable",
                    "Initially frustrated, responds well to acknowledgment",
                ),
                Gender::Male,
                "Fenrir",
            ),
        ]
    })
}

/// Look a scenario up by id.
///
/// # Errors
/// Returns `ConvoError::UnknownScenario` if no scenario has that id.
pub fn find(id: &str) -> Result<&'static Scenario> {
    let id = id.trim();
    catalog()
        .iter()
        .find(|s| s.id == id)
        .ok_or_else(|| ConvoError::UnknownScenario(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn catalog_has_six_unique_scenarios_with_voices() {
        let all = catalog();
        assert_eq!(all.len(), 6);
        let ids: HashSet<_> = all.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids.len(), 6);
        assert!(all.iter().all(|s| !s.persona.voice_name.is_empty()));
    }

    #[test]
    fn find_resolves_by_trimmed_id() {
        let scenario = find(" 6 ").unwrap();
        assert_eq!(scenario.title, "Difficult Customer");
        assert_eq!(scenario.persona.name, "Morgan");
        assert_eq!(scenario.difficulty, Difficulty::Easy);
    }

    #[test]
    fn find_rejects_unknown_ids() {
        assert!(matches!(find("42"), Err(ConvoError::UnknownScenario(id)) if id == "42"));
    }

    #[test]
    fn persona_serializes_like_the_reply_request() {
        let json = serde_json::to_value(&find("2").unwrap().persona).unwrap();
        assert_eq!(json["emotionalTendency"], "Takes criticism personally, needs encouragement");
        assert_eq!(json["gender"], "MALE");
        assert_eq!(json["voiceName"], "Charon");
    }
}
