//! `PlaybackSession`: the single active speech slot.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──play()──► Playing ──finished / failed──► on_end(..) ──► Idle
//!                     │
//!                     ├──play()──► on_end(Superseded), next clip Playing
//!                     └──stop()──► Idle (on_end never fires)
//! ```
//!
//! Every exit from `Playing` goes through the same order: detach the slot under
//! the lock, notify (except on `stop`), halt the voice, release the clip. A
//! `Completion` only acts if its generation still owns the slot, so late or
//! duplicate engine signals are ignored and `on_end` fires at most once. The
//! drop guard on `Completion` makes it at least once.
//!
//! Callbacks always run with the slot lock released, so `on_end` may call back
//! into the session.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{
    ClipId, PlaybackDiagnostics, PlaybackEngine, PlaybackOutcome, PlaybackSnapshot, Voice,
};
use crate::audio::codec::{decode_base64_pcm, encode_wav, parse_sample_rate};

type OnEnd = Box<dyn FnOnce(PlaybackOutcome) + Send + 'static>;

/// Coarse session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Playing,
}

struct Slot {
    generation: u64,
    clip: ClipId,
    /// `None` between slot registration and `engine.start` returning.
    voice: Option<Box<dyn Voice>>,
    on_end: Option<OnEnd>,
}

struct Shared {
    engine: Arc<dyn PlaybackEngine>,
    slot: Mutex<Option<Slot>>,
    generation: AtomicU64,
    diagnostics: PlaybackDiagnostics,
}

impl Shared {
    fn detach(&self) -> Option<Slot> {
        self.slot.lock().take()
    }

    fn detach_if(&self, generation: u64) -> Option<Slot> {
        let mut guard = self.slot.lock();
        if guard.as_ref().is_some_and(|s| s.generation == generation) {
            guard.take()
        } else {
            None
        }
    }

    /// Notify (unless `outcome` is `None`), then halt and release.
    /// Must be called without the slot lock held.
    fn retire(&self, mut slot: Slot, outcome: Option<PlaybackOutcome>) {
        match outcome {
            Some(outcome) => {
                self.diagnostics.record(&outcome);
                debug!(clip = %slot.clip, generation = slot.generation, ?outcome, "playback ended");
                if let Some(on_end) = slot.on_end.take() {
                    on_end(outcome);
                }
            }
            None => {
                self.diagnostics.stopped.fetch_add(1, Ordering::Relaxed);
                debug!(clip = %slot.clip, generation = slot.generation, "playback stopped");
            }
        }

        if let Some(mut voice) = slot.voice.take() {
            voice.halt();
        }
        self.engine.release(slot.clip);
    }

    fn complete(&self, generation: u64, outcome: PlaybackOutcome) {
        match self.detach_if(generation) {
            Some(slot) => self.retire(slot, Some(outcome)),
            None => debug!(generation, "completion for a retired clip ignored"),
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(mut slot) = self.slot.get_mut().take() {
            if let Some(mut voice) = slot.voice.take() {
                voice.halt();
            }
            self.engine.release(slot.clip);
        }
    }
}

/// One-shot completion signal handed to the engine with each clip.
///
/// Consuming either method retires the clip and fires the session's `on_end`.
/// Dropping it unfired counts as a failure.
pub struct Completion {
    shared: Weak<Shared>,
    generation: u64,
    fired: bool,
}

impl Completion {
    /// The clip played to its end.
    pub fn finished(mut self) {
        self.fire(PlaybackOutcome::Finished);
    }

    /// The clip could not be played.
    pub fn failed(mut self, reason: impl Into<String>) {
        self.fire(PlaybackOutcome::Failed(reason.into()));
    }

    /// The session halted the voice and already retired the clip; nothing
    /// to report.
    pub fn halted(mut self) {
        self.fired = true;
        debug!(generation = self.generation, "completion released after halt");
    }

    /// Generation of the `play` call this completion belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn fire(&mut self, outcome: PlaybackOutcome) {
        if std::mem::replace(&mut self.fired, true) {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.complete(self.generation, outcome);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.fired {
            self.fire(PlaybackOutcome::Failed(
                "playback engine dropped the clip without finishing".into(),
            ));
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("generation", &self.generation)
            .field("fired", &self.fired)
            .finish()
    }
}

/// Owner of the one playing speech clip.
///
/// Cheap to clone: clones share the same slot. Build one per process and hand
/// clones to whoever needs to start or stop speech.
#[derive(Clone)]
pub struct PlaybackSession {
    shared: Arc<Shared>,
}

impl PlaybackSession {
    pub fn new(engine: Arc<dyn PlaybackEngine>) -> Self {
        Self {
            shared: Arc::new(Shared {
                engine,
                slot: Mutex::new(None),
                generation: AtomicU64::new(0),
                diagnostics: PlaybackDiagnostics::default(),
            }),
        }
    }

    /// Play a base64 PCM payload, cutting off whatever is playing now.
    ///
    /// `on_end` fires exactly once: `Finished` at the natural end, `Failed` if
    /// the engine refuses or errors, `Superseded` if a later `play` cuts this
    /// clip off. It does not fire if the clip is cancelled with [`stop`].
    ///
    /// Malformed audio never surfaces as an error here; it plays as silence.
    ///
    /// Returns the clip's playback generation for [`stop_generation`], or
    /// `None` if the engine rejected the clip (`on_end` has already fired).
    ///
    /// [`stop`]: PlaybackSession::stop
    /// [`stop_generation`]: PlaybackSession::stop_generation
    pub fn play<F>(&self, b64_audio: &str, mime: &str, on_end: F) -> Option<u64>
    where
        F: FnOnce(PlaybackOutcome) + Send + 'static,
    {
        let shared = &self.shared;

        if let Some(previous) = shared.detach() {
            shared.retire(previous, Some(PlaybackOutcome::Superseded));
        }

        let sample_rate = parse_sample_rate(mime);
        let samples = decode_base64_pcm(b64_audio);
        if samples.is_empty() && !b64_audio.trim().is_empty() {
            warn!(mime, "speech payload decoded to no samples; playing silence");
        }
        let wav = encode_wav(&samples, sample_rate);

        let clip = match shared.engine.load(wav) {
            Ok(clip) => clip,
            Err(e) => {
                warn!("playback engine rejected clip: {e}");
                let outcome = PlaybackOutcome::Failed(e.to_string());
                shared.diagnostics.record(&outcome);
                on_end(outcome);
                return None;
            }
        };

        let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let displaced = shared.slot.lock().replace(Slot {
            generation,
            clip,
            voice: None,
            on_end: Some(Box::new(on_end)),
        });
        if let Some(displaced) = displaced {
            // Only reachable if another play raced in while this one decoded.
            shared.retire(displaced, Some(PlaybackOutcome::Superseded));
        }

        shared.diagnostics.started.fetch_add(1, Ordering::Relaxed);
        info!(
            %clip,
            generation,
            sample_rate,
            samples = samples.len(),
            "playback starting"
        );

        let completion = Completion {
            shared: Arc::downgrade(shared),
            generation,
            fired: false,
        };

        match shared.engine.start(clip, completion) {
            Ok(voice) => {
                let mut guard = shared.slot.lock();
                match guard.as_mut() {
                    Some(slot) if slot.generation == generation => {
                        slot.voice = Some(voice);
                    }
                    _ => {
                        // Already completed (or cut off) while starting.
                        drop(guard);
                        let mut voice = voice;
                        voice.halt();
                    }
                }
            }
            Err(e) => {
                warn!(%clip, "playback failed to start: {e}");
                shared.complete(generation, PlaybackOutcome::Failed(e.to_string()));
            }
        }
        Some(generation)
    }

    /// Cancel playback without notifying. Idempotent.
    pub fn stop(&self) {
        if let Some(slot) = self.shared.detach() {
            self.shared.retire(slot, None);
        }
    }

    /// Cancel playback without notifying, but only if the slot still holds
    /// the clip started with `generation`. Returns whether a clip was stopped.
    pub fn stop_generation(&self, generation: u64) -> bool {
        match self.shared.detach_if(generation) {
            Some(slot) => {
                self.shared.retire(slot, None);
                true
            }
            None => false,
        }
    }

    pub fn state(&self) -> PlaybackState {
        if self.shared.slot.lock().is_some() {
            PlaybackState::Playing
        } else {
            PlaybackState::Idle
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    /// Clip currently owned by the session, if any.
    pub fn active_clip(&self) -> Option<ClipId> {
        self.shared.slot.lock().as_ref().map(|s| s.clip)
    }

    pub fn diagnostics(&self) -> PlaybackSnapshot {
        self.shared.diagnostics.snapshot()
    }
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConvoError, Result};
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    /// Engine that parks completions so tests decide when clips end.
    #[derive(Default)]
    struct ScriptedEngine {
        next_id: AtomicU64,
        live: Mutex<HashSet<ClipId>>,
        pending: Mutex<Vec<Completion>>,
        halts: Arc<AtomicUsize>,
        refuse_start: std::sync::atomic::AtomicBool,
        refuse_load: std::sync::atomic::AtomicBool,
    }

    struct ScriptedVoice {
        halts: Arc<AtomicUsize>,
    }

    impl Voice for ScriptedVoice {
        fn halt(&mut self) {
            self.halts.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ScriptedEngine {
        fn take_completion(&self) -> Completion {
            self.pending.lock().pop().expect("a pending completion")
        }

        fn live_clips(&self) -> usize {
            self.live.lock().len()
        }
    }

    impl PlaybackEngine for ScriptedEngine {
        fn load(&self, wav: Vec<u8>) -> Result<ClipId> {
            if self.refuse_load.load(Ordering::SeqCst) {
                return Err(ConvoError::InvalidWav("refused".into()));
            }
            assert!(wav.starts_with(b"RIFF"));
            let id = ClipId(self.next_id.fetch_add(1, Ordering::SeqCst));
            self.live.lock().insert(id);
            Ok(id)
        }

        fn start(&self, _clip: ClipId, completion: Completion) -> Result<Box<dyn Voice>> {
            if self.refuse_start.load(Ordering::SeqCst) {
                return Err(ConvoError::AudioStream("device busy".into()));
            }
            self.pending.lock().push(completion);
            Ok(Box::new(ScriptedVoice {
                halts: Arc::clone(&self.halts),
            }))
        }

        fn release(&self, clip: ClipId) {
            self.live.lock().remove(&clip);
        }
    }

    fn payload() -> String {
        STANDARD.encode([0u8, 16, 0, 32, 0, 48])
    }

    fn counter() -> (Arc<Mutex<Vec<PlaybackOutcome>>>, impl FnOnce(PlaybackOutcome) + Send) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |outcome| sink.lock().push(outcome))
    }

    fn setup() -> (Arc<ScriptedEngine>, PlaybackSession) {
        let engine = Arc::new(ScriptedEngine::default());
        let session = PlaybackSession::new(engine.clone());
        (engine, session)
    }

    #[test]
    fn natural_end_notifies_once_and_releases() {
        let (engine, session) = setup();
        let (seen, on_end) = counter();
        session.play(&payload(), "audio/L16;rate=24000", on_end);
        assert_eq!(session.state(), PlaybackState::Playing);
        assert_eq!(engine.live_clips(), 1);

        engine.take_completion().finished();

        assert_eq!(*seen.lock(), vec![PlaybackOutcome::Finished]);
        assert_eq!(session.state(), PlaybackState::Idle);
        assert_eq!(engine.live_clips(), 0);
        assert_eq!(engine.halts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mid_stream_error_notifies_once() {
        let (engine, session) = setup();
        let (seen, on_end) = counter();
        session.play(&payload(), "audio/L16", on_end);

        engine.take_completion().failed("decoder glitch");

        assert_eq!(
            *seen.lock(),
            vec![PlaybackOutcome::Failed("decoder glitch".into())]
        );
        assert!(!session.is_playing());
        assert_eq!(engine.live_clips(), 0);
    }

    #[test]
    fn stop_never_notifies() {
        let (engine, session) = setup();
        let (seen, on_end) = counter();
        session.play(&payload(), "audio/L16", on_end);
        let late = engine.take_completion();

        session.stop();
        session.stop();
        late.finished();

        assert!(seen.lock().is_empty());
        assert_eq!(engine.live_clips(), 0);
        assert_eq!(session.diagnostics().stopped, 1);
    }

    #[test]
    fn second_play_supersedes_the_first() {
        let (engine, session) = setup();
        let (first, first_end) = counter();
        let (second, second_end) = counter();

        session.play(&payload(), "audio/L16", first_end);
        let first_clip = session.active_clip().expect("first clip");
        let stale = engine.take_completion();
        session.play(&payload(), "audio/L16", second_end);

        assert_eq!(*first.lock(), vec![PlaybackOutcome::Superseded]);
        assert_eq!(engine.live_clips(), 1);
        assert_ne!(session.active_clip(), Some(first_clip));

        // The cut-off clip's engine signal arrives late and is ignored.
        stale.finished();
        assert_eq!(first.lock().len(), 1);
        assert!(session.is_playing());

        engine.take_completion().finished();
        assert_eq!(*second.lock(), vec![PlaybackOutcome::Finished]);
        assert_eq!(engine.live_clips(), 0);
    }

    #[test]
    fn refused_start_notifies_and_leaves_idle() {
        let (engine, session) = setup();
        engine.refuse_start.store(true, Ordering::SeqCst);
        let (seen, on_end) = counter();

        session.play(&payload(), "audio/L16", on_end);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], PlaybackOutcome::Failed(_)));
        assert_eq!(session.state(), PlaybackState::Idle);
        assert_eq!(engine.live_clips(), 0);
    }

    #[test]
    fn rejected_clip_notifies_failure() {
        let (engine, session) = setup();
        engine.refuse_load.store(true, Ordering::SeqCst);
        let (seen, on_end) = counter();

        session.play(&payload(), "audio/L16", on_end);

        assert_eq!(seen.lock().len(), 1);
        assert!(!session.is_playing());
    }

    #[test]
    fn malformed_audio_still_plays_and_completes() {
        let (engine, session) = setup();
        let (seen, on_end) = counter();
        session.play("not-valid-base64!!!", "audio/L16", on_end);
        assert!(session.is_playing());
        engine.take_completion().finished();
        assert_eq!(*seen.lock(), vec![PlaybackOutcome::Finished]);
    }

    #[test]
    fn dropped_completion_counts_as_failure() {
        let (engine, session) = setup();
        let (seen, on_end) = counter();
        session.play(&payload(), "audio/L16", on_end);

        drop(engine.take_completion());

        assert_eq!(seen.lock().len(), 1);
        assert!(matches!(seen.lock()[0], PlaybackOutcome::Failed(_)));
    }

    #[test]
    fn halted_completion_reports_nothing() {
        let (engine, session) = setup();
        let (seen, on_end) = counter();
        session.play(&payload(), "audio/L16", on_end);

        engine.take_completion().halted();

        assert!(seen.lock().is_empty());
        assert!(session.is_playing());
        assert_eq!(session.diagnostics().failed, 0);
        session.stop();
        assert_eq!(engine.live_clips(), 0);
    }

    #[test]
    fn stop_generation_only_cancels_its_own_clip() {
        let (engine, session) = setup();
        let (first, first_end) = counter();
        let (second, second_end) = counter();

        let old = session.play(&payload(), "audio/L16", first_end).expect("started");
        let current = session.play(&payload(), "audio/L16", second_end).expect("started");
        assert_ne!(old, current);

        assert!(!session.stop_generation(old));
        assert!(session.is_playing());

        assert!(session.stop_generation(current));
        assert!(!session.is_playing());
        assert_eq!(engine.live_clips(), 0);
        assert_eq!(*first.lock(), vec![PlaybackOutcome::Superseded]);
        assert!(second.lock().is_empty());
    }

    #[test]
    fn rejected_clip_has_no_generation() {
        let (engine, session) = setup();
        engine.refuse_load.store(true, Ordering::SeqCst);
        let (_seen, on_end) = counter();
        assert_eq!(session.play(&payload(), "audio/L16", on_end), None);
    }

    #[test]
    fn on_end_may_start_the_next_clip() {
        let (engine, session) = setup();
        let chained = session.clone();
        let (second, second_end) = counter();
        let second_end = Mutex::new(Some(second_end));

        session.play(&payload(), "audio/L16", move |_| {
            if let Some(next) = second_end.lock().take() {
                chained.play(&payload(), "audio/L16", next);
            }
        });
        engine.take_completion().finished();

        assert!(session.is_playing());
        assert_eq!(engine.live_clips(), 1);
        engine.take_completion().finished();
        assert_eq!(*second.lock(), vec![PlaybackOutcome::Finished]);
    }
}
