//! Speaker output via cpal.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS), so every clip gets its own playback thread that opens the device,
//! owns the stream and drops it. `start` blocks until that thread reports
//! whether the device opened, so device errors surface synchronously.
//!
//! The output callback only copies from a pre-resampled buffer and never
//! allocates or locks.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
};
use crossbeam_channel::{bounded, select, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::{ClipId, Completion, PlaybackEngine, Voice};
use crate::audio::{resample::resample_clip, AudioChunk};
use crate::error::{ConvoError, Result};

/// Silence appended after the clip so the device drains its last buffer.
const TAIL_MILLIS: u32 = 60;

pub struct CpalEngine {
    clips: Mutex<HashMap<ClipId, Arc<AudioChunk>>>,
    next_id: AtomicU64,
    preferred_device: Option<String>,
}

impl CpalEngine {
    /// Output on `preferred_device` if it exists, else the system default.
    pub fn new(preferred_device: Option<String>) -> Self {
        Self {
            clips: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            preferred_device,
        }
    }

    /// Name of the device clips would play on right now.
    ///
    /// # Errors
    /// Returns `ConvoError::NoDefaultOutputDevice` when nothing can play audio.
    pub fn output_device_name(&self) -> Result<String> {
        let device = select_device(self.preferred_device.as_deref())?;
        Ok(device.name().unwrap_or_else(|_| "unknown output".into()))
    }
}

struct CpalVoice {
    halt_tx: Sender<()>,
}

impl Voice for CpalVoice {
    fn halt(&mut self) {
        let _ = self.halt_tx.try_send(());
    }
}

impl PlaybackEngine for CpalEngine {
    fn load(&self, wav: Vec<u8>) -> Result<ClipId> {
        let reader = hound::WavReader::new(Cursor::new(wav))?;
        let spec = reader.spec();
        if spec.channels != 1 || spec.bits_per_sample != 16 {
            return Err(ConvoError::InvalidWav(format!(
                "expected mono 16-bit, got {} ch / {} bit",
                spec.channels, spec.bits_per_sample
            )));
        }
        let samples = reader
            .into_samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<std::result::Result<Vec<f32>, _>>()?;

        let id = ClipId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(clip = %id, samples = samples.len(), sample_rate = spec.sample_rate, "clip loaded");
        self.clips
            .lock()
            .insert(id, Arc::new(AudioChunk::new(samples, spec.sample_rate)));
        Ok(id)
    }

    fn start(&self, clip: ClipId, completion: Completion) -> Result<Box<dyn Voice>> {
        let chunk = self
            .clips
            .lock()
            .get(&clip)
            .cloned()
            .ok_or(ConvoError::UnknownClip(clip.0))?;
        let preferred = self.preferred_device.clone();

        let (open_tx, open_rx) = bounded::<Result<()>>(1);
        let (halt_tx, halt_rx) = bounded::<()>(1);

        std::thread::Builder::new()
            .name("digiconvo-playback".into())
            .spawn(move || {
                let (done_tx, done_rx) = bounded::<()>(1);
                let (err_tx, err_rx) = bounded::<String>(1);

                let stream = match open_stream(preferred.as_deref(), &chunk, done_tx, err_tx) {
                    Ok(stream) => {
                        let _ = open_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        completion.failed(e.to_string());
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };

                select! {
                    recv(halt_rx) -> _ => {
                        drop(stream);
                        debug!(%clip, "playback halted");
                        completion.halted();
                    }
                    recv(done_rx) -> _ => {
                        drop(stream);
                        completion.finished();
                    }
                    recv(err_rx) -> msg => {
                        drop(stream);
                        let reason = msg.unwrap_or_else(|_| "output stream closed".into());
                        error!(%clip, "output stream error: {reason}");
                        completion.failed(reason);
                    }
                }
            })?;

        match open_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalVoice { halt_tx })),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConvoError::AudioStream(
                "playback thread exited before opening the device".into(),
            )),
        }
    }

    fn release(&self, clip: ClipId) {
        self.clips.lock().remove(&clip);
    }
}

fn select_device(preferred: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();

    if let Some(preferred_name) = preferred {
        match host.output_devices() {
            Ok(mut devices) => {
                if let Some(device) =
                    devices.find(|d| d.name().map(|n| n == preferred_name).unwrap_or(false))
                {
                    return Ok(device);
                }
                warn!("preferred output device '{preferred_name}' not found, falling back");
            }
            Err(e) => warn!("failed to list output devices while resolving preference: {e}"),
        }
    }

    if let Some(default) = host.default_output_device() {
        return Ok(default);
    }

    let mut devices = host
        .output_devices()
        .map_err(|e| ConvoError::AudioDevice(e.to_string()))?;
    let fallback = devices.next().ok_or(ConvoError::NoDefaultOutputDevice)?;
    warn!("no default output device, falling back to first available output");
    Ok(fallback)
}

/// Open the device, resample the clip to its rate and start the stream.
/// Must run on the thread that will drop the returned stream.
fn open_stream(
    preferred: Option<&str>,
    chunk: &AudioChunk,
    done_tx: Sender<()>,
    err_tx: Sender<String>,
) -> Result<Stream> {
    let device = select_device(preferred)?;
    let supported = device
        .default_output_config()
        .map_err(|e| ConvoError::AudioDevice(e.to_string()))?;

    let device_rate = supported.sample_rate().0;
    let channels = supported.channels();
    info!(
        device = device.name().unwrap_or_default().as_str(),
        device_rate,
        channels,
        clip_rate = chunk.sample_rate,
        "opening output device"
    );

    let mut samples = if chunk.sample_rate == 0 {
        Vec::new()
    } else {
        resample_clip(&chunk.samples, chunk.sample_rate, device_rate)?
    };
    samples.resize(samples.len() + (device_rate * TAIL_MILLIS / 1000) as usize, 0.0);

    let config = StreamConfig {
        channels,
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, samples, done_tx, err_tx),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, samples, done_tx, err_tx),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, samples, done_tx, err_tx),
        fmt => Err(ConvoError::AudioStream(format!(
            "unsupported sample format: {fmt:?}"
        ))),
    }?;

    stream
        .play()
        .map_err(|e| ConvoError::AudioStream(e.to_string()))?;
    Ok(stream)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    samples: Vec<f32>,
    done_tx: Sender<()>,
    err_tx: Sender<String>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let mut cursor = 0usize;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let value = samples.get(cursor).copied().unwrap_or(0.0);
                    cursor = cursor.saturating_add(1);
                    let out = T::from_sample(value);
                    for slot in frame.iter_mut() {
                        *slot = out;
                    }
                }
                if cursor >= samples.len() {
                    let _ = done_tx.try_send(());
                }
            },
            move |err| {
                let _ = err_tx.try_send(err.to_string());
            },
            None,
        )
        .map_err(|e| ConvoError::AudioStream(e.to_string()))
}
