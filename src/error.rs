//! Error types for the voice session pipeline.

/// Top-level error type for the voice-chat audio pipeline.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// Speech-to-text transcription error (backend failure or timeout).
    #[error("transcription error: {0}")]
    Transcription(String),

    /// Text-to-speech synthesis error (backend failure or timeout).
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Output streaming / playback error.
    #[error("playback error: {0}")]
    Playback(String),

    /// Conversational handler error.
    #[error("handler error: {0}")]
    Handler(String),

    /// Session orchestration error.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, VoiceError>;
