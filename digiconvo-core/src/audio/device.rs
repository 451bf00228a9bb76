//! Audio output device enumeration.

use serde::{Deserialize, Serialize};

/// Metadata about an audio output device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default output device.
    pub is_default: bool,
    /// Heuristic flag for display-attached sinks (HDMI/DisplayPort monitors).
    pub is_display_sink: bool,
    /// Heuristic recommendation for the best speech output.
    pub is_recommended: bool,
}

const DISPLAY_SINK_KEYWORDS: &[&str] = &[
    "hdmi",
    "displayport",
    "display audio",
    "nvidia high definition",
    "amd high definition",
    "intel(r) display",
];

const SPEECH_OUTPUT_KEYWORDS: &[&str] = &[
    "speaker",
    "headphone",
    "headset",
    "earphone",
    "airpods",
    "buds",
    "analog",
    "usb",
];

/// Best-effort heuristic for outputs that route to a monitor.
pub fn is_display_sink_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    DISPLAY_SINK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Score a device name for likely speech playback.
///
/// Higher is better. Display sinks are ranked below everything else.
pub fn output_preference_score(name: &str) -> i32 {
    let lowered = name.trim().to_ascii_lowercase();
    let mut score = if is_display_sink_name(&lowered) { -12 } else { 6 };
    if SPEECH_OUTPUT_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 4;
    }
    if lowered.contains("default") {
        score += 1;
    }
    score
}

/// Mark the best-scoring device as recommended and sort for display.
fn rank_devices(mut list: Vec<DeviceInfo>) -> Vec<DeviceInfo> {
    if let Some((idx, _)) = list
        .iter()
        .enumerate()
        .max_by_key(|(_, d)| output_preference_score(&d.name) + if d.is_default { 3 } else { 0 })
    {
        if let Some(best) = list.get_mut(idx) {
            best.is_recommended = true;
        }
    }

    list.sort_by_key(|d| {
        (
            !d.is_recommended,
            !d.is_default,
            d.is_display_sink,
            d.name.to_ascii_lowercase(),
        )
    });
    list
}

/// List all available audio output devices on the system.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    match host.output_devices() {
        Ok(devices) => {
            let list = devices
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("Output Device {}", idx + 1));
                    DeviceInfo {
                        is_default: default_name.as_deref() == Some(name.as_str()),
                        is_display_sink: is_display_sink_name(&name),
                        is_recommended: false,
                        name,
                    }
                })
                .collect::<Vec<_>>();
            rank_devices(list)
        }
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            match default_name {
                Some(name) => vec![DeviceInfo {
                    is_display_sink: is_display_sink_name(&name),
                    is_default: true,
                    is_recommended: true,
                    name,
                }],
                None => vec![],
            }
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}
