//! Error types for the voice edge

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors raised by the media side of a call.
///
/// Anything that reaches the turn controller as a `VoiceError` means the
/// channel can no longer be trusted and the session ends.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("VAD initialization failed: {0}")]
    VadInit(String),

    #[error("VAD processing error: {0}")]
    VadProcessing(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Utterance capture error: {0}")]
    Capture(String),

    #[error("Recording error: {0}")]
    Recording(String),

    #[error("Media channel closed: {0}")]
    ChannelClosed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    /// True when the failure means the caller is gone rather than a single
    /// primitive misbehaving.
    pub fn is_channel_gone(&self) -> bool {
        matches!(self, VoiceError::ChannelClosed(_))
    }
}
