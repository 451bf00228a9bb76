//! Prompt text sent to the generative model.

use super::ChatTurn;
use crate::conversation::{Scenario, Sender};

pub const NO_CONTEXT: &str = "No additional context provided.";

pub fn tone_analysis(text: &str) -> String {
    format!(
        "You are an expert communication analyst and an empathetic coach.\n\
Your task is to analyze the following text, which represents a person's message in a sensitive conversation.\n\
Your goal is to identify the primary emotional tone and provide constructive feedback.\n\
\n\
Analyze this text: \"{text}\"\n\
\n\
Based on your analysis of this text, you MUST respond with a JSON object that strictly adheres to the provided schema. \
Do not add any text or markdown before or after the JSON object.\n\
\n\
Guidance for JSON Fields:\n\
- primaryEmotion: Select the single, most dominant emotion from the provided enum list.\n\
- intensity: On a scale of 1 (very mild) to 10 (extremely intense), how strong is this emotion?\n\
- confidence: As a percentage from 0 to 100, how confident are you in your assessment?\n\
- suggestions: Provide 2-3 brief, concrete, and actionable suggestions for how the author could improve their communication to be more effective or empathetic."
    )
}

/// Transcript lines as `The User: ...` / `<persona>: ...`.
pub fn transcript(history: &[ChatTurn], persona_name: &str) -> String {
    history
        .iter()
        .map(|turn| {
            let speaker = match turn.sender {
                Sender::User => "The User",
                Sender::Ai => persona_name,
            };
            format!("{speaker}: {}", turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn scenario_reply(history: &[ChatTurn], scenario: &Scenario) -> String {
    let persona = &scenario.persona;
    format!(
        "You are a conversational practice partner. Your name is {name}.\n\
Your personality is: \"{personality}\".\n\
Your emotional tendency is: \"{tendency}\".\n\
\n\
You are role-playing in a conversation with a user. Do NOT break character.\n\
The scenario of this role play is: \"{description}\".\n\
The following is the conversation history so far. The user's last message is at the end.\n\
\n\
{transcript}\n\
\n\
Based on your personality and the conversation history, provide a natural, in-character response to the user's last message.\n\
Your response must be a single block of text. Do not add any extra formatting.",
        name = persona.name,
        personality = persona.personality,
        tendency = persona.emotional_tendency,
        description = scenario.description,
        transcript = transcript(history, &persona.name),
    )
}

pub fn speech(persona_name: &str, reply: &str) -> String {
    format!("[speaker: {persona_name}] {reply}")
}

pub fn image_analysis(context: Option<&str>) -> String {
    let context = context
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(NO_CONTEXT);
    format!(
        "You are an expert communication coach and a compassionate, empathetic assistant.\n\
Your task is to analyze the text message conversation from the provided screenshot.\n\
The user is seeking to improve their communication in difficult and sensitive situations.\n\
\n\
Here is some context from the user about this conversation: \"{context}\"\n\
\n\
Please follow these steps in your analysis:\n\
\n\
1. **Transcribe the Conversation:** First, carefully transcribe the text messages from the image. \
Identify the different speakers if possible (e.g., \"Person A:\", \"Person B:\").\n\
\n\
2. **Analyze the Tone:** In a section called \"Tone Analysis\", describe the overall tone of the conversation. \
Is it tense, sad, angry, supportive, avoidant? Analyze the tone of each participant. \
Use descriptive words and explain your reasoning based on specific words and phrases from the text.\n\
\n\
3. **Identify Areas for Improvement:** In a section called \"Constructive Feedback\", pinpoint specific messages or phrases that could be improved. \
For each point, quote the original text and explain *why* it might be perceived negatively or how it could be misinterpreted. \
Focus on clarity, empathy, and potential emotional impact.\n\
\n\
4. **Suggest Concrete Alternatives:** For each point of feedback, provide specific, actionable suggestions for what could have been said instead. \
In a section called \"Suggested Alternatives\", offer 2-3 rephrased options for each identified message. \
These alternatives should aim to be more constructive, empathetic, or clearer, depending on the situation.\n\
\n\
5. **Provide a Final Summary:** Conclude with a brief, encouraging summary that reinforces good communication practices.\n\
\n\
Structure your entire response in clear, well-formatted Markdown."
    )
}
