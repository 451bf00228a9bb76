use thiserror::Error;

/// All errors produced by digiconvo-core.
#[derive(Debug, Error)]
pub enum ConvoError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("no scenario selected; start a session first")]
    NoScenario,

    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("invalid WAV container: {0}")]
    InvalidWav(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("unknown clip id {0}")]
    UnknownClip(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for ConvoError {
    fn from(err: serde_json::Error) -> Self {
        ConvoError::MalformedResponse(err.to_string())
    }
}

impl From<hound::Error> for ConvoError {
    fn from(err: hound::Error) -> Self {
        ConvoError::InvalidWav(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConvoError>;
