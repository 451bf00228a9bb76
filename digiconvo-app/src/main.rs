//! DigiConvo terminal host.
//!
//! Reads chat lines and `/commands` from stdin, drives a `ConversationEngine`
//! backed by Gemini, and prints engine events as they arrive.

mod commands;
mod settings;
mod state;
mod storage;

use std::sync::Arc;

use anyhow::Context;
use digiconvo_core::conversation::scenario;
use digiconvo_core::ipc::events::{ACTIVITY_CHANNEL, CONVERSATION_CHANNEL};
use digiconvo_core::{
    ConversationBackend, ConversationEngine, ConversationEventKind, CpalEngine, EngineConfig,
    GeminiBackend, PlaybackEngine, PlaybackOutcome, PlaybackSession, Sender, TimedEngine,
};
use settings::{default_settings_path, load_settings, save_settings};
use state::AppState;
use storage::LocalStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use commands::{Command, Outcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "digiconvo=info,digiconvo_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("DigiConvo starting");

    let settings_path = default_settings_path();
    let app_settings = load_settings(&settings_path);
    if let Err(e) = save_settings(&settings_path, &app_settings) {
        warn!("failed to write normalized settings: {e}");
    }
    info!(
        settings_path = ?settings_path,
        chat_model = %app_settings.chat_model,
        tts_model = %app_settings.tts_model,
        speech_enabled = app_settings.speech_enabled,
        history_enabled = app_settings.history_enabled,
        "settings loaded"
    );

    // ── Engine setup ──────────────────────────────────────────────────────
    let gemini_config = app_settings.gemini_config();
    if !gemini_config.has_api_key() {
        anyhow::bail!(
            "no Gemini API key: set GEMINI_API_KEY or geminiApiKey in {}",
            settings_path.display()
        );
    }
    let backend = Arc::new(GeminiBackend::new(gemini_config).context("building Gemini client")?);

    let speaker = CpalEngine::new(app_settings.preferred_output_device.clone());
    let output: Arc<dyn PlaybackEngine> = match speaker.output_device_name() {
        Ok(device) => {
            info!(%device, "speech output ready");
            Arc::new(speaker)
        }
        Err(e) => {
            warn!("no usable audio output ({e}); replies will be silent");
            Arc::new(TimedEngine::new())
        }
    };

    let config = EngineConfig {
        speech_enabled: app_settings.speech_enabled,
        ..EngineConfig::default()
    };
    let engine = Arc::new(ConversationEngine::new(
        config,
        backend,
        PlaybackSession::new(output),
    ));

    let store = Arc::new(
        LocalStore::new(LocalStore::default_db_path())
            .map_err(anyhow::Error::msg)
            .context("opening session history")?,
    );
    match store.prune_history(app_settings.retention_days) {
        Ok(0) => {}
        Ok(pruned) => info!(pruned, "old sessions pruned"),
        Err(e) => warn!("history prune failed at startup: {e}"),
    }

    let default_scenario = app_settings.default_scenario.clone();
    let state = AppState::new(Arc::clone(&engine), app_settings, settings_path, store);

    // ── Forward engine events → console ───────────────────────────────────
    spawn_event_printers(&engine);

    println!("{}", commands::HELP);
    if let Some(id) = default_scenario {
        run(&state, Command::Scenario(id)).await;
    } else {
        println!("\nPick a scenario with /scenario <id>:\n");
        run(&state, Command::Scenarios).await;
    }

    // ── REPL ──────────────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                run(&state, Command::Quit).await;
                break;
            }
            Err(e) => {
                warn!("stdin read failed: {e}");
                run(&state, Command::Quit).await;
                break;
            }
        };
        let Some(cmd) = commands::parse(&line) else {
            continue;
        };
        if run(&state, cmd).await {
            break;
        }
    }

    engine.stop_speaking();
    let diag = state.diagnostics_snapshot();
    info!(
        turns = diag.turns.turns_submitted,
        replies_failed = diag.turns.replies_failed,
        tone_failed = diag.turns.tone_failed,
        clips_started = diag.playback.started,
        clips_failed = diag.playback.failed,
        "DigiConvo stopped"
    );
    Ok(())
}

/// Execute one command, printing its output. Returns `true` to quit.
async fn run<B: ConversationBackend>(state: &AppState<B>, cmd: Command) -> bool {
    match commands::execute(state, cmd).await {
        Ok(Outcome::Print(text)) => {
            println!("{text}");
            false
        }
        Ok(Outcome::Silent) => false,
        Ok(Outcome::Quit) => true,
        Err(e) => {
            println!("error: {e:#}");
            false
        }
    }
}

fn spawn_event_printers<B: ConversationBackend>(engine: &Arc<ConversationEngine<B>>) {
    let mut conversation_rx = engine.subscribe_conversation();
    let engine_for_names = Arc::clone(engine);
    tokio::spawn(async move {
        loop {
            match conversation_rx.recv().await {
                Ok(event) => match event.kind {
                    ConversationEventKind::MessageAppended { message } => {
                        if message.sender == Sender::Ai {
                            let name = speaker_name(&engine_for_names);
                            println!("\n{name}: {}\n", message.content);
                        }
                    }
                    ConversationEventKind::EmotionUpdated { analysis, .. } => {
                        println!(
                            "  [tone: {} {}/10]",
                            analysis.primary_emotion, analysis.intensity
                        );
                        for tip in &analysis.suggestions {
                            println!("    - {tip}");
                        }
                    }
                    ConversationEventKind::SessionStarted { .. }
                    | ConversationEventKind::TranscriptCleared => {}
                },
                Err(RecvError::Lagged(n)) => {
                    warn!(channel = CONVERSATION_CHANNEL, "receiver lagged by {n} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut activity_rx = engine.subscribe_activity();
    tokio::spawn(async move {
        let mut was_typing = false;
        loop {
            match activity_rx.recv().await {
                Ok(event) => {
                    if event.typing && !was_typing {
                        println!("  ...");
                    }
                    was_typing = event.typing;
                    if let Some(PlaybackOutcome::Failed(reason)) = &event.playback {
                        warn!(seq = event.seq, "speech playback failed: {reason}");
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(channel = ACTIVITY_CHANNEL, "receiver lagged by {n} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn speaker_name<B: ConversationBackend>(engine: &ConversationEngine<B>) -> String {
    engine
        .snapshot()
        .scenario_id
        .and_then(|id| scenario::find(&id).ok())
        .map(|s| s.persona.name.clone())
        .unwrap_or_else(|| "AI".into())
}
