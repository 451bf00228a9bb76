//! Single-slot speech playback.
//!
//! `PlaybackSession` owns at most one playing clip. Audio output itself sits
//! behind the `PlaybackEngine` trait so the session logic is independent of
//! any sound backend:
//!
//! | Engine | Use |
//! |--------|-----|
//! | `CpalEngine` | speaker output via cpal (`audio-cpal` feature) |
//! | `TimedEngine` | headless: waits out the clip duration, no sound |
//!
//! ## Resource model
//!
//! ```text
//! load(wav) ──► ClipId ──► start(clip, Completion) ──► Box<dyn Voice>
//!                 │                    │                      │
//!           release(clip)   finished() | failed()          halt()
//! ```
//!
//! A `ClipId` is the temporary resource registered with the engine; a `Voice`
//! is the live sound. The session releases both on every exit path.

pub mod session;
pub mod timed;

#[cfg(feature = "audio-cpal")]
pub mod output;

#[cfg(feature = "audio-cpal")]
pub use output::CpalEngine;

pub use session::{Completion, PlaybackSession, PlaybackState};
pub use timed::TimedEngine;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Engine-issued handle for a loaded WAV clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClipId(pub u64);

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clip-{}", self.0)
    }
}

/// Why a `play` call's completion callback fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum PlaybackOutcome {
    /// The clip played to its natural end.
    Finished,
    /// The engine refused to start or errored mid-stream.
    Failed(String),
    /// A newer `play` call cut this clip off.
    Superseded,
}

/// A clip that is currently sounding.
pub trait Voice: Send {
    /// Silence the clip immediately. Must not fire the clip's `Completion`.
    fn halt(&mut self);
}

/// Contract for audio output backends.
pub trait PlaybackEngine: Send + Sync + 'static {
    /// Register WAV bytes as a playable clip.
    ///
    /// # Errors
    /// Returns an error if the bytes are not a WAV container the engine can play.
    fn load(&self, wav: Vec<u8>) -> Result<ClipId>;

    /// Begin playing a loaded clip.
    ///
    /// The engine must eventually call exactly one of `completion.finished()`
    /// or `completion.failed(..)` unless the returned voice is halted first.
    ///
    /// # Errors
    /// Returns an error if playback cannot begin; `completion` is dropped.
    fn start(&self, clip: ClipId, completion: Completion) -> Result<Box<dyn Voice>>;

    /// Forget a clip. Unknown ids are ignored.
    fn release(&self, clip: ClipId);
}

/// Counters for playback observability.
#[derive(Default)]
pub struct PlaybackDiagnostics {
    pub started: AtomicUsize,
    pub finished: AtomicUsize,
    pub failed: AtomicUsize,
    pub superseded: AtomicUsize,
    pub stopped: AtomicUsize,
}

impl PlaybackDiagnostics {
    pub(crate) fn record(&self, outcome: &PlaybackOutcome) {
        let counter = match outcome {
            PlaybackOutcome::Finished => &self.finished,
            PlaybackOutcome::Failed(_) => &self.failed,
            PlaybackOutcome::Superseded => &self.superseded,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            started: self.started.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            stopped: self.stopped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub started: usize,
    pub finished: usize,
    pub failed: usize,
    pub superseded: usize,
    pub stopped: usize,
}
