//! PCM ↔ WAV conversion for text-to-speech payloads.
//!
//! The TTS service returns raw little-endian i16 mono PCM as base64, with the
//! sample rate carried in a mime descriptor such as `audio/L16;codec=pcm;rate=24000`.
//! Playback backends want a self-describing container, so the payload is
//! normalised to f32 and re-wrapped in a canonical 44-byte RIFF/WAVE header.
//!
//! Every function here is pure. Decoding never fails: a malformed payload
//! degrades to silence and the caller decides how loudly to report it.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use tracing::warn;

use crate::audio::AudioChunk;
use crate::error::{ConvoError, Result};

/// Sample rate assumed when the mime descriptor carries no usable `rate=`.
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Size of the canonical PCM WAV header written by [`encode_wav`].
pub const WAV_HEADER_LEN: usize = 44;

const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;
const BLOCK_ALIGN: u16 = CHANNELS * BITS_PER_SAMPLE / 8;
const FORMAT_PCM: u16 = 1;
const FMT_CHUNK_LEN: u32 = 16;

/// Lenient base64: padding optional, trailing bits tolerated.
const LENIENT_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decode base64 little-endian i16 PCM into normalised f32 samples.
///
/// Each sample is `i16 / 32768.0`, so the output lies in [-1.0, 1.0).
/// ASCII whitespace inside the payload is ignored. A trailing odd byte is
/// dropped. Malformed base64 yields an empty vector.
pub fn decode_base64_pcm(b64: &str) -> Vec<f32> {
    let compact: String = b64.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = match LENIENT_B64.decode(compact.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, len = b64.len(), "failed to decode base64 PCM payload");
            return Vec::new();
        }
    };

    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

/// Decode a TTS payload straight into an [`AudioChunk`] at the advertised rate.
pub fn decode_chunk(b64: &str, mime: &str) -> AudioChunk {
    AudioChunk::new(decode_base64_pcm(b64), parse_sample_rate(mime))
}

/// Wrap f32 samples in a mono 16-bit PCM WAV container.
///
/// Samples are clamped to [-1.0, 1.0] (NaN is written as silence), then scaled
/// asymmetrically: negatives by 32768, non-negatives by 32767.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = u32::try_from(samples.len() as u64 * BLOCK_ALIGN as u64)
        .unwrap_or(u32::MAX)
        .min(u32::MAX - 36);
    let byte_rate = sample_rate.saturating_mul(BLOCK_ALIGN as u32);

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + data_len as usize);

    // RIFF chunk descriptor
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    // fmt sub-chunk
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&FMT_CHUNK_LEN.to_le_bytes());
    out.extend_from_slice(&FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&CHANNELS.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&BLOCK_ALIGN.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    // data sub-chunk
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());

    for &sample in samples {
        out.extend_from_slice(&quantize(sample).to_le_bytes());
    }

    out
}

fn quantize(sample: f32) -> i16 {
    let s = if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    };
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Extract the sample rate from a mime descriptor's `rate=<digits>` parameter.
///
/// Falls back to [`DEFAULT_SAMPLE_RATE`] when the parameter is absent, has no
/// digits, is zero, or is too large for the WAV byte-rate field.
pub fn parse_sample_rate(mime: &str) -> u32 {
    for (idx, _) in mime.match_indices("rate=") {
        let digits: String = mime[idx + "rate=".len()..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if digits.is_empty() {
            continue;
        }
        return match digits.parse::<u32>() {
            Ok(rate) if rate > 0 && rate.checked_mul(BLOCK_ALIGN as u32).is_some() => rate,
            _ => DEFAULT_SAMPLE_RATE,
        };
    }
    DEFAULT_SAMPLE_RATE
}

/// Header fields of a canonical 44-byte PCM WAV container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub riff_size: u32,
    pub format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub data_size: u32,
}

impl WavHeader {
    /// Read back the header written by [`encode_wav`].
    ///
    /// # Errors
    /// `ConvoError::InvalidWav` if the buffer is short or the chunk ids are wrong.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < WAV_HEADER_LEN {
            return Err(ConvoError::InvalidWav(format!(
                "header needs {WAV_HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let tag = |at: usize| &bytes[at..at + 4];
        if tag(0) != b"RIFF" || tag(8) != b"WAVE" || tag(12) != b"fmt " || tag(36) != b"data" {
            return Err(ConvoError::InvalidWav("unexpected chunk ids".into()));
        }
        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let u32_at = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };

        Ok(Self {
            riff_size: u32_at(4),
            format: u16_at(20),
            channels: u16_at(22),
            sample_rate: u32_at(24),
            byte_rate: u32_at(28),
            block_align: u16_at(32),
            bits_per_sample: u16_at(34),
            data_size: u32_at(40),
        })
    }

    /// Number of sample frames described by `data_size`.
    pub fn frame_count(&self) -> u32 {
        if self.block_align == 0 {
            return 0;
        }
        self.data_size / self.block_align as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use base64::engine::general_purpose::STANDARD;

    fn sample_at(wav: &[u8], idx: usize) -> i16 {
        let at = WAV_HEADER_LEN + idx * 2;
        i16::from_le_bytes([wav[at], wav[at + 1]])
    }

    #[test]
    fn header_sizes_track_sample_count() {
        for n in [0usize, 1, 2, 7, 480, 24_000] {
            let wav = encode_wav(&vec![0.25; n], 24_000);
            let header = WavHeader::parse(&wav).expect("parse header");
            assert_eq!(header.data_size as usize, 2 * n, "data size for n={n}");
            assert_eq!(header.riff_size as usize, 36 + 2 * n, "riff size for n={n}");
            assert_eq!(wav.len(), WAV_HEADER_LEN + 2 * n);
        }
    }

    #[test]
    fn header_describes_mono_16_bit_pcm() {
        let wav = encode_wav(&[0.0; 4], 16_000);
        let header = WavHeader::parse(&wav).expect("parse header");
        assert_eq!(header.format, 1);
        assert_eq!(header.channels, 1);
        assert_eq!(header.bits_per_sample, 16);
        assert_eq!(header.sample_rate, 16_000);
        assert_eq!(header.byte_rate, 32_000);
        assert_eq!(header.block_align, 2);
        assert_eq!(header.frame_count(), 4);
    }

    #[test]
    fn out_of_range_samples_clamp_to_the_boundary() {
        let wav = encode_wav(&[1.5, 1.0, -2.0, -1.0, 100.0, -100.0], 24_000);
        assert_eq!(sample_at(&wav, 0), sample_at(&wav, 1));
        assert_eq!(sample_at(&wav, 0), i16::MAX);
        assert_eq!(sample_at(&wav, 2), sample_at(&wav, 3));
        assert_eq!(sample_at(&wav, 2), i16::MIN);
        assert_eq!(sample_at(&wav, 4), i16::MAX);
        assert_eq!(sample_at(&wav, 5), i16::MIN);
    }

    #[test]
    fn scaling_is_asymmetric_and_truncates() {
        let wav = encode_wav(&[0.5, -0.5, 0.0, f32::NAN], 24_000);
        assert_eq!(sample_at(&wav, 0), 16_383);
        assert_eq!(sample_at(&wav, 1), -16_384);
        assert_eq!(sample_at(&wav, 2), 0);
        assert_eq!(sample_at(&wav, 3), 0);
    }

    #[test]
    fn encoding_is_deterministic() {
        let samples: Vec<f32> = (0..256).map(|i| ((i as f32) * 0.1).sin()).collect();
        assert_eq!(encode_wav(&samples, 22_050), encode_wav(&samples, 22_050));
    }

    #[test]
    fn decode_normalises_little_endian_i16() {
        let raw: Vec<u8> = [0i16, 16_384, -32_768, 32_767]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let samples = decode_base64_pcm(&STANDARD.encode(raw));
        assert_eq!(samples.len(), 4);
        assert_relative_eq!(samples[0], 0.0);
        assert_relative_eq!(samples[1], 0.5);
        assert_relative_eq!(samples[2], -1.0);
        assert_relative_eq!(samples[3], 32_767.0 / 32_768.0);
    }

    #[test]
    fn decode_rejects_garbage_without_panicking() {
        assert!(decode_base64_pcm("not-valid-base64!!!").is_empty());
    }

    #[test]
    fn decode_drops_trailing_odd_byte() {
        let samples = decode_base64_pcm(&STANDARD.encode([0x00, 0x40, 0x7f]));
        assert_eq!(samples.len(), 1);
        assert_relative_eq!(samples[0], 0.5);
    }

    #[test]
    fn decode_tolerates_whitespace_and_missing_padding() {
        let encoded = STANDARD.encode([0x00, 0x40, 0x00, 0xc0]);
        let unpadded = encoded.trim_end_matches('=');
        let wrapped = format!("{}\n {}", &unpadded[..4], &unpadded[4..]);
        let samples = decode_base64_pcm(&wrapped);
        assert_eq!(samples.len(), 2);
        assert_relative_eq!(samples[0], 0.5);
        assert_relative_eq!(samples[1], -0.5);
    }

    #[test]
    fn decoded_audio_reencodes_to_the_same_pcm() {
        let pcm: Vec<i16> = vec![-32_768, -1, 0, 1, 1234, 32_767];
        let raw: Vec<u8> = pcm.iter().flat_map(|s| s.to_le_bytes()).collect();
        let chunk = decode_chunk(&STANDARD.encode(&raw), "audio/L16;rate=16000");
        assert_eq!(chunk.sample_rate, 16_000);

        let wav = chunk.to_wav();
        let decoded: Vec<i16> = (0..pcm.len()).map(|i| sample_at(&wav, i)).collect();
        // Positive samples lose at most one step to the 32767 scale.
        for (got, want) in decoded.iter().zip(&pcm) {
            assert!((*got as i32 - *want as i32).abs() <= 1, "got {got}, want {want}");
        }
    }

    #[test]
    fn sample_rate_parsing() {
        assert_eq!(parse_sample_rate("audio/L16;rate=16000"), 16_000);
        assert_eq!(parse_sample_rate("audio/L16;codec=pcm;rate=24000"), 24_000);
        assert_eq!(parse_sample_rate("audio/L16"), DEFAULT_SAMPLE_RATE);
        assert_eq!(parse_sample_rate(""), DEFAULT_SAMPLE_RATE);
        assert_eq!(parse_sample_rate("audio/L16;rate="), DEFAULT_SAMPLE_RATE);
        assert_eq!(parse_sample_rate("audio/L16;rate=abc"), DEFAULT_SAMPLE_RATE);
        assert_eq!(parse_sample_rate("audio/L16;rate=0"), DEFAULT_SAMPLE_RATE);
        assert_eq!(
            parse_sample_rate("audio/L16;rate=99999999999"),
            DEFAULT_SAMPLE_RATE
        );
    }

    #[test]
    fn oversized_rate_falls_back_and_never_overflows_the_header() {
        let mime = "audio/L16;codec=pcm;rate=3000000000";
        assert_eq!(parse_sample_rate(mime), DEFAULT_SAMPLE_RATE);
        assert_eq!(
            parse_sample_rate("audio/L16;rate=2147483647"),
            2_147_483_647
        );
        assert_eq!(
            parse_sample_rate("audio/L16;rate=2147483648"),
            DEFAULT_SAMPLE_RATE
        );

        let wav = encode_wav(&[0.0; 4], 3_000_000_000);
        let header = WavHeader::parse(&wav).expect("parse header");
        assert_eq!(header.sample_rate, 3_000_000_000);
        assert_eq!(header.byte_rate, u32::MAX);
        assert_eq!(header.data_size, 8);
    }

    #[test]
    fn header_parse_rejects_short_or_foreign_buffers() {
        assert!(WavHeader::parse(&[0u8; 10]).is_err());
        let mut wav = encode_wav(&[0.0; 2], 24_000);
        wav[0] = b'X';
        assert!(WavHeader::parse(&wav).is_err());
    }
}
