//! Audio data path for AI speech playback.
//!
//! ```text
//! base64 PCM (TTS service) ─► codec::decode_base64_pcm ─► AudioChunk (f32, mono)
//!                                                            │
//!                                                 codec::encode_wav
//!                                                            │
//!                                       WAV bytes ─► PlaybackEngine::load
//! ```
//!
//! Only one PCM layout is supported end to end: signed 16-bit little-endian,
//! mono, at whatever rate the service advertises in its mime descriptor.

pub mod codec;
pub mod device;
pub mod resample;

pub use codec::{decode_base64_pcm, encode_wav, parse_sample_rate, DEFAULT_SAMPLE_RATE};

/// A contiguous block of mono PCM samples at a known sample rate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioChunk {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 24000, 48000).
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Returns the duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Returns true if the chunk contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Encode this chunk as a mono 16-bit WAV container.
    pub fn to_wav(&self) -> Vec<u8> {
        encode_wav(&self.samples, self.sample_rate)
    }
}
