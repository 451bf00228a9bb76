//! Sample-rate conversion for playback using a rubato `FastFixedIn` resampler.
//!
//! TTS audio arrives at the rate advertised by the service (24 kHz by default)
//! while output devices usually run at 44.1 or 48 kHz. Clips are short and
//! fully buffered, so conversion happens once on the playback thread before the
//! stream opens, never inside the device callback.
//!
//! When source rate == device rate the converter is a passthrough and no rubato
//! session is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, error};

use crate::error::{ConvoError, Result};

/// Input frames per rubato call.
pub const DEFAULT_CHUNK: usize = 1024;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` in passthrough mode.
    resampler: Option<FastFixedIn<f32>>,
    /// Holds input samples until a full `chunk_size` block is available.
    pending: Vec<f32>,
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a converter from `source_rate` to `device_rate`.
    ///
    /// # Errors
    /// Returns `ConvoError::AudioStream` if rubato fails to initialise.
    pub fn new(source_rate: u32, device_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == device_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = device_rate as f64 / source_rate as f64;
        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| ConvoError::AudioStream(format!("resampler init: {e}")))?;

        let output_buf = vec![vec![0f32; resampler.output_frames_max()]; 1];
        debug!(source_rate, device_rate, chunk_size, "playback resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Feed samples; returns whatever full blocks could be converted.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);
        let mut result = Vec::new();

        while self.pending.len() >= self.chunk_size {
            let block = &self.pending[..self.chunk_size];
            match resampler.process_into_buffer(&[block], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.pending.drain(..self.chunk_size);
        }

        result
    }

    /// Convert any buffered remainder, zero-padding the final block.
    pub fn flush(&mut self) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return Vec::new();
        };
        if self.pending.is_empty() {
            return Vec::new();
        }

        let tail = std::mem::take(&mut self.pending);
        let input: [&[f32]; 1] = [tail.as_slice()];
        match resampler.process_partial_into_buffer(Some(&input[..]), &mut self.output_buf, None) {
            Ok((_consumed, produced)) => self.output_buf[0][..produced].to_vec(),
            Err(e) => {
                error!("resampler flush error: {e}");
                Vec::new()
            }
        }
    }

    /// Returns `true` when no resampling occurs.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Convert a whole clip in one go.
pub fn resample_clip(samples: &[f32], source_rate: u32, device_rate: u32) -> Result<Vec<f32>> {
    let mut rc = RateConverter::new(source_rate, device_rate, DEFAULT_CHUNK)?;
    let mut out = rc.process(samples);
    out.extend(rc.flush());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(24_000, 24_000, DEFAULT_CHUNK).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
        assert!(rc.flush().is_empty());
    }

    #[test]
    fn upsampling_24k_to_48k_roughly_doubles_length() {
        let samples = vec![0.1f32; 24_000];
        let out = resample_clip(&samples, 24_000, 48_000).unwrap();
        let expected = 48_000isize;
        assert!(
            (out.len() as isize - expected).unsigned_abs() <= 2 * DEFAULT_CHUNK,
            "output len={} expected≈{}",
            out.len(),
            expected
        );
    }

    #[test]
    fn short_clip_is_not_lost_in_the_accumulator() {
        let mut rc = RateConverter::new(24_000, 48_000, DEFAULT_CHUNK).unwrap();
        assert!(rc.process(&[0.0f32; 300]).is_empty());
        assert!(!rc.flush().is_empty(), "flush must emit the buffered tail");
    }
}
