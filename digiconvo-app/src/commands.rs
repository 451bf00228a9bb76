//! REPL command parsing and handlers.
//!
//! Lines starting with `/` are commands; anything else is a chat message for
//! the active scenario.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use digiconvo_core::audio::device::list_output_devices;
use digiconvo_core::conversation::scenario;
use digiconvo_core::ConversationBackend;
use tracing::{info, warn};

use crate::settings::save_settings;
use crate::state::AppState;

const HISTORY_LIMIT: usize = 10;
const STATS_RANGE_DAYS: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Scenarios,
    Scenario(String),
    Stop,
    Speech,
    Emotions,
    Image {
        path: PathBuf,
        context: Option<String>,
    },
    Clear,
    Devices,
    Stats,
    /// Recent sessions, or one stored transcript when an id is given.
    History(Option<String>),
    Help,
    Quit,
    /// Plain text for the current scenario.
    Say(String),
    /// A `/word` that is not a known command, or one missing its argument.
    Invalid(String),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Say(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let cmd = match name.to_ascii_lowercase().as_str() {
        "scenarios" => Command::Scenarios,
        "scenario" if !arg.is_empty() => Command::Scenario(arg.to_string()),
        "scenario" => Command::Invalid("usage: /scenario <id>".into()),
        "stop" => Command::Stop,
        "speech" => Command::Speech,
        "emotions" => Command::Emotions,
        "image" => match arg.split_once(char::is_whitespace) {
            Some((path, context)) => Command::Image {
                path: PathBuf::from(path),
                context: Some(context.trim().to_string()),
            },
            None if !arg.is_empty() => Command::Image {
                path: PathBuf::from(arg),
                context: None,
            },
            None => Command::Invalid("usage: /image <path> [context]".into()),
        },
        "clear" => Command::Clear,
        "devices" => Command::Devices,
        "stats" => Command::Stats,
        "history" => Command::History((!arg.is_empty()).then(|| arg.to_string())),
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => Command::Invalid(format!("unknown command `/{other}`; try /help")),
    };
    Some(cmd)
}

/// What the REPL should do after a command ran.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Print(String),
    Silent,
    Quit,
}

pub async fn execute<B: ConversationBackend>(
    state: &AppState<B>,
    cmd: Command,
) -> anyhow::Result<Outcome> {
    let outcome = match cmd {
        Command::Say(text) => {
            return Ok(match state.engine.submit(&text) {
                Ok(handle) => {
                    let metrics = state.perf_metrics.clone();
                    let started = Instant::now();
                    tokio::spawn(async move {
                        handle.join().await;
                        metrics
                            .lock()
                            .record_turn(started.elapsed().as_secs_f64() * 1000.0);
                    });
                    Outcome::Silent
                }
                Err(e) => Outcome::Print(e.to_string()),
            });
        }
        Command::Scenarios => Outcome::Print(scenario_list()),
        Command::Scenario(id) => {
            let scenario = scenario::find(&id)?;
            state.persist_session();
            state.engine.start_session(scenario.clone());
            Outcome::Print(format!(
                "Now talking to {} in \"{}\" ({})\n{}",
                scenario.persona.name,
                scenario.title,
                scenario.difficulty.as_str(),
                scenario.description
            ))
        }
        Command::Stop => {
            state.engine.stop_speaking();
            Outcome::Silent
        }
        Command::Speech => {
            let enabled = state.engine.toggle_speech();
            let mut settings = state.settings.lock();
            settings.speech_enabled = enabled;
            if let Err(e) = save_settings(&state.settings_path, &settings) {
                warn!("failed to save settings: {e}");
            }
            Outcome::Print(format!("speech {}", if enabled { "on" } else { "off" }))
        }
        Command::Emotions => Outcome::Print(emotion_report(state)),
        Command::Image { path, context } => {
            let mime_type = image_mime_type(&path)?;
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let analysis = state
                .engine
                .analyze_image(&STANDARD.encode(bytes), mime_type, context.as_deref())
                .await?;
            Outcome::Print(analysis)
        }
        Command::Clear => {
            state.persist_session();
            state.engine.clear_chat();
            Outcome::Print("chat cleared".into())
        }
        Command::Devices => {
            let devices = list_output_devices();
            if devices.is_empty() {
                Outcome::Print("no output devices found".into())
            } else {
                let lines: Vec<String> = devices
                    .iter()
                    .map(|d| {
                        let mut tags = Vec::new();
                        if d.is_default {
                            tags.push("default");
                        }
                        if d.is_recommended {
                            tags.push("recommended");
                        }
                        if tags.is_empty() {
                            format!("  {}", d.name)
                        } else {
                            format!("  {} [{}]", d.name, tags.join(", "))
                        }
                    })
                    .collect();
                Outcome::Print(lines.join("\n"))
            }
        }
        Command::Stats => {
            let perf = state.perf_snapshot();
            let stored = state
                .store
                .get_stats(STATS_RANGE_DAYS)
                .map_err(anyhow::Error::msg)?;
            Outcome::Print(serde_json::to_string_pretty(&serde_json::json!({
                "live": perf,
                "history": stored,
            }))?)
        }
        Command::History(Some(session_id)) => {
            let messages = state
                .store
                .session_messages(&session_id)
                .map_err(anyhow::Error::msg)?;
            if messages.is_empty() {
                Outcome::Print(format!("no stored messages for {session_id}"))
            } else {
                let lines: Vec<String> = messages
                    .iter()
                    .map(|m| match (&m.emotion, m.intensity) {
                        (Some(emotion), Some(intensity)) => format!(
                            "  [{}] {}: {}  ({emotion} {intensity}/10)",
                            m.created_at, m.sender, m.content
                        ),
                        _ => format!("  [{}] {}: {}", m.created_at, m.sender, m.content),
                    })
                    .collect();
                Outcome::Print(lines.join("\n"))
            }
        }
        Command::History(None) => {
            let sessions = state
                .store
                .list_sessions(HISTORY_LIMIT)
                .map_err(anyhow::Error::msg)?;
            if sessions.is_empty() {
                Outcome::Print("no stored sessions".into())
            } else {
                let lines: Vec<String> = sessions
                    .iter()
                    .map(|s| {
                        format!(
                            "  {}  scenario {}  {} messages  ({})",
                            s.started_at, s.scenario_id, s.message_count, s.id
                        )
                    })
                    .collect();
                Outcome::Print(lines.join("\n"))
            }
        }
        Command::Help => Outcome::Print(HELP.into()),
        Command::Quit => {
            let stored = state.persist_session();
            info!(stored, "quitting");
            Outcome::Quit
        }
        Command::Invalid(msg) => Outcome::Print(msg),
    };
    Ok(outcome)
}

pub const HELP: &str = "\
/scenarios              list practice scenarios
/scenario <id>          start a session
/stop                   stop the AI speaking
/speech                 toggle spoken replies
/emotions               tone history of this session
/image <path> [context] analyze a conversation screenshot
/clear                  clear the chat
/devices                list audio outputs
/stats                  live counters and 30-day history totals
/history [session-id]   stored sessions, or one transcript
/quit                   exit";

fn scenario_list() -> String {
    scenario::catalog()
        .iter()
        .map(|s| {
            format!(
                "  {}. {} [{}, {}] with {}",
                s.id,
                s.title,
                s.category,
                s.difficulty.as_str(),
                s.persona.name
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn emotion_report<B: ConversationBackend>(state: &AppState<B>) -> String {
    let snapshot = state.engine.snapshot();
    if snapshot.emotion_history.is_empty() {
        return "no tone analysis yet".into();
    }
    snapshot
        .emotion_history
        .iter()
        .enumerate()
        .map(|(i, e)| {
            format!(
                "  {}. {} (intensity {}/10, confidence {}%)",
                i + 1,
                e.primary_emotion,
                e.intensity,
                e.confidence
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn image_mime_type(path: &Path) -> anyhow::Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    Ok(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        _ => bail!("unsupported image type: {}", path.display()),
    })
}
