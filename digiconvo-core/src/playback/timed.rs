//! Headless playback engine.
//!
//! Waits out each clip's duration on a worker thread and then reports it as
//! finished. Used when no output device is available and in tests, where
//! `with_time_scale` shortens the wait.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::debug;

use super::{ClipId, Completion, PlaybackEngine, Voice};
use crate::error::{ConvoError, Result};

pub struct TimedEngine {
    clips: Mutex<HashMap<ClipId, Duration>>,
    next_id: AtomicU64,
    time_scale: f64,
}

impl TimedEngine {
    pub fn new() -> Self {
        Self::with_time_scale(1.0)
    }

    /// Scale every clip's wait; `0.0` finishes clips immediately.
    pub fn with_time_scale(time_scale: f64) -> Self {
        Self {
            clips: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            time_scale: time_scale.max(0.0),
        }
    }

    /// Number of clips loaded and not yet released.
    pub fn live_clips(&self) -> usize {
        self.clips.lock().len()
    }
}

impl Default for TimedEngine {
    fn default() -> Self {
        Self::new()
    }
}

struct TimedVoice {
    halt_tx: Sender<()>,
}

impl Voice for TimedVoice {
    fn halt(&mut self) {
        let _ = self.halt_tx.try_send(());
    }
}

impl PlaybackEngine for TimedEngine {
    fn load(&self, wav: Vec<u8>) -> Result<ClipId> {
        let reader = hound::WavReader::new(Cursor::new(wav))?;
        let spec = reader.spec();
        if spec.sample_rate == 0 {
            return Err(ConvoError::InvalidWav("sample rate is zero".into()));
        }
        let duration = Duration::from_secs_f64(reader.duration() as f64 / spec.sample_rate as f64);

        let id = ClipId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.clips.lock().insert(id, duration);
        debug!(clip = %id, ?duration, "timed clip loaded");
        Ok(id)
    }

    fn start(&self, clip: ClipId, completion: Completion) -> Result<Box<dyn Voice>> {
        let duration = self
            .clips
            .lock()
            .get(&clip)
            .copied()
            .ok_or(ConvoError::UnknownClip(clip.0))?;
        let wait = duration.mul_f64(self.time_scale);

        let (halt_tx, halt_rx) = bounded::<()>(1);
        std::thread::Builder::new()
            .name("digiconvo-timed-playback".into())
            .spawn(move || match halt_rx.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => completion.finished(),
                // Halted, or the voice was dropped: the session already retired the clip.
                Ok(()) | Err(RecvTimeoutError::Disconnected) => completion.halted(),
            })?;

        Ok(Box::new(TimedVoice { halt_tx }))
    }

    fn release(&self, clip: ClipId) {
        self.clips.lock().remove(&clip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::encode_wav;
    use crate::playback::{PlaybackOutcome, PlaybackSession};
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::sync::Arc;

    #[test]
    fn load_reads_duration_from_header() {
        let engine = TimedEngine::new();
        let clip = engine.load(encode_wav(&[0.0; 12_000], 24_000)).unwrap();
        assert_eq!(engine.clips.lock()[&clip], Duration::from_millis(500));
        engine.release(clip);
        assert_eq!(engine.live_clips(), 0);
    }

    #[test]
    fn load_rejects_non_wav() {
        let engine = TimedEngine::new();
        assert!(engine.load(b"definitely not a wav".to_vec()).is_err());
    }

    #[test]
    fn session_finishes_through_timed_engine() {
        let engine = Arc::new(TimedEngine::with_time_scale(0.0));
        let session = PlaybackSession::new(engine.clone());
        let (tx, rx) = crossbeam_channel::bounded(1);

        let pcm = STANDARD.encode(vec![0u8; 480]);
        session.play(&pcm, "audio/L16;rate=24000", move |outcome| {
            let _ = tx.send(outcome);
        });

        let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, PlaybackOutcome::Finished);
        assert!(!session.is_playing());
        assert_eq!(engine.live_clips(), 0);
    }

    #[test]
    fn halted_clip_never_finishes() {
        let engine = Arc::new(TimedEngine::with_time_scale(1.0));
        let session = PlaybackSession::new(engine.clone());
        let (tx, rx) = crossbeam_channel::bounded(1);

        // Two seconds of silence at 24 kHz.
        let pcm = STANDARD.encode(vec![0u8; 96_000]);
        session.play(&pcm, "audio/L16;rate=24000", move |outcome| {
            let _ = tx.send(outcome);
        });
        session.stop();

        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        assert_eq!(engine.live_clips(), 0);

        // The playback thread has released its completion by now.
        let stats = session.diagnostics();
        assert_eq!(stats.stopped, 1);
        assert_eq!(stats.failed, 0);
    }
}
