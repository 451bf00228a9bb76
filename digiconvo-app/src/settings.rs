//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use digiconvo_core::backend::gemini::{
    DEFAULT_CHAT_MODEL, DEFAULT_TTS_MODEL, DEFAULT_VISION_MODEL,
};
use digiconvo_core::conversation::scenario;
use digiconvo_core::GeminiConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub gemini_api_key: Option<String>,
    pub chat_model: String,
    pub tts_model: String,
    pub vision_model: String,
    pub preferred_output_device: Option<String>,
    pub speech_enabled: bool,
    pub history_enabled: bool,
    pub retention_days: usize,
    /// Scenario started automatically at launch.
    pub default_scenario: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            chat_model: DEFAULT_CHAT_MODEL.into(),
            tts_model: DEFAULT_TTS_MODEL.into(),
            vision_model: DEFAULT_VISION_MODEL.into(),
            preferred_output_device: None,
            speech_enabled: true,
            history_enabled: true,
            retention_days: 90,
            default_scenario: None,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.chat_model = normalize_model(&self.chat_model, DEFAULT_CHAT_MODEL);
        self.tts_model = normalize_model(&self.tts_model, DEFAULT_TTS_MODEL);
        self.vision_model = normalize_model(&self.vision_model, DEFAULT_VISION_MODEL);
        self.gemini_api_key = trimmed(self.gemini_api_key.as_deref());
        self.preferred_output_device = trimmed(self.preferred_output_device.as_deref());
        self.retention_days = self.retention_days.clamp(1, 3650);
        self.default_scenario = trimmed(self.default_scenario.as_deref())
            .filter(|id| scenario::find(id).is_ok());
    }

    /// Copy model and key choices onto `config`.
    pub fn apply_to(&self, config: &mut GeminiConfig) {
        if let Some(key) = &self.gemini_api_key {
            config.api_key = key.clone();
        }
        config.chat_model = self.chat_model.clone();
        config.tts_model = self.tts_model.clone();
        config.vision_model = self.vision_model.clone();
    }

    /// Backend config from these settings; environment variables win.
    pub fn gemini_config(&self) -> GeminiConfig {
        let mut config = GeminiConfig::default();
        self.apply_to(&mut config);
        config.apply_env();
        config
    }
}

fn normalize_model(raw: &str, default: &str) -> String {
    let model = raw.trim();
    if model.is_empty() {
        default.into()
    } else {
        model.into()
    }
}

fn trimmed(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Platform data directory for DigiConvo files.
pub fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("DigiConvo")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("digiconvo")
    }
}

pub fn default_settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_fills_blanks_and_clamps() {
        let mut settings = AppSettings {
            gemini_api_key: Some("   ".into()),
            chat_model: "  ".into(),
            tts_model: " custom-tts ".into(),
            preferred_output_device: Some(" Speakers ".into()),
            retention_days: 0,
            default_scenario: Some("99".into()),
            ..AppSettings::default()
        };
        settings.normalize();

        assert_eq!(settings.gemini_api_key, None);
        assert_eq!(settings.chat_model, DEFAULT_CHAT_MODEL);
        assert_eq!(settings.tts_model, "custom-tts");
        assert_eq!(settings.preferred_output_device.as_deref(), Some("Speakers"));
        assert_eq!(settings.retention_days, 1);
        assert_eq!(settings.default_scenario, None);
    }

    #[test]
    fn partial_json_takes_defaults() {
        let raw = r#"{ "speechEnabled": false, "retentionDays": 99999, "defaultScenario": "3" }"#;
        let mut settings: AppSettings = serde_json::from_str(raw).unwrap();
        settings.normalize();
        assert!(!settings.speech_enabled);
        assert!(settings.history_enabled);
        assert_eq!(settings.retention_days, 3650);
        assert_eq!(settings.default_scenario.as_deref(), Some("3"));
        assert_eq!(settings.vision_model, DEFAULT_VISION_MODEL);
    }

    #[test]
    fn apply_to_copies_models_and_key() {
        let settings = AppSettings {
            gemini_api_key: Some("k-123".into()),
            chat_model: "gemini-2.0-flash".into(),
            ..AppSettings::default()
        };
        let mut config = GeminiConfig::default();
        settings.apply_to(&mut config);
        assert_eq!(config.api_key, "k-123");
        assert_eq!(config.chat_model, "gemini-2.0-flash");
        assert_eq!(config.tts_model, DEFAULT_TTS_MODEL);
    }

    #[test]
    fn save_then_load_preserves_values() {
        let path = std::env::temp_dir()
            .join(format!("digiconvo-settings-{}", std::process::id()))
            .join("settings.json");
        let settings = AppSettings {
            speech_enabled: false,
            retention_days: 30,
            ..AppSettings::default()
        };
        save_settings(&path, &settings).unwrap();

        let loaded = load_settings(&path);
        assert!(!loaded.speech_enabled);
        assert_eq!(loaded.retention_days, 30);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let loaded = load_settings(Path::new("/nonexistent/digiconvo/settings.json"));
        assert!(loaded.speech_enabled);
        assert_eq!(loaded.retention_days, 90);
    }
}
