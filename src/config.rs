//! Configuration types for the voice session pipeline.

use crate::error::{Result, VoiceError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for a voice session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Audio format settings for the transport and the pipeline.
    pub audio: AudioConfig,
    /// Voice activity detection settings.
    pub vad: VadConfig,
    /// Utterance endpointing settings (silence timeout / watchdog).
    pub endpoint: EndpointConfig,
    /// Playback and barge-in settings.
    pub playback: PlaybackConfig,
    /// External engine call bounds.
    pub engines: EngineConfig,
}

/// Audio format configuration.
///
/// The transport delivers interleaved signed 16-bit PCM at a fixed rate and
/// channel count that are never renegotiated mid-session. Capture frames are
/// decimated to a mono pipeline rate for detection and transcription; the
/// decimation ratio over the interleaved stream must be an exact integer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of transport capture frames in Hz.
    pub transport_sample_rate: u32,
    /// Channel count of transport capture frames.
    pub transport_channels: u16,
    /// Mono sample rate the pipeline runs at (detection + transcription).
    pub pipeline_sample_rate: u32,
    /// Sample rate of synthesized output audio in Hz.
    pub output_sample_rate: u32,
    /// Channel count of synthesized output audio.
    pub output_channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            transport_sample_rate: 48_000,
            transport_channels: 2,
            pipeline_sample_rate: 16_000,
            output_sample_rate: 48_000,
            output_channels: 2,
        }
    }
}

impl AudioConfig {
    /// Decimation step over the interleaved transport stream that yields
    /// mono samples at the pipeline rate (e.g. 48kHz stereo → 16kHz mono
    /// is a step of 6).
    ///
    /// # Errors
    ///
    /// Returns an error if the rates do not divide exactly; the supported
    /// transports have fixed formats, so a non-exact ratio is a
    /// misconfiguration rather than a resampling problem to solve.
    pub fn decimation(&self) -> Result<usize> {
        if self.pipeline_sample_rate == 0 {
            return Err(VoiceError::Config("pipeline_sample_rate must be non-zero".into()));
        }
        let interleaved = u64::from(self.transport_sample_rate) * u64::from(self.transport_channels);
        if interleaved == 0 || interleaved % u64::from(self.pipeline_sample_rate) != 0 {
            return Err(VoiceError::Config(format!(
                "transport format {}Hz x{} is not an integer multiple of pipeline rate {}Hz",
                self.transport_sample_rate, self.transport_channels, self.pipeline_sample_rate
            )));
        }
        Ok((interleaved / u64::from(self.pipeline_sample_rate)) as usize)
    }
}

/// Voice activity detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Speech probability threshold for the model path.
    ///
    /// Windows whose model probability exceeds this value are classified as
    /// speech. 0.6 rejects most background noise while keeping quiet speech.
    pub threshold: f32,
    /// RMS energy threshold for the fallback path, over samples in \[-1, 1\].
    ///
    /// Pre-calibrated separately from `threshold`; used when no model is
    /// installed or a model call fails.
    pub energy_threshold: f32,
    /// Evaluation window size in mono pipeline-rate samples (~64ms at 16kHz).
    pub window_samples: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            energy_threshold: 0.015,
            window_samples: 1024,
        }
    }
}

/// Utterance endpointing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Trailing silence in ms after which an utterance is finalized.
    pub silence_timeout_ms: u64,
    /// Watchdog tick interval in ms.
    ///
    /// The watchdog finalizes utterances for speakers whose transport stops
    /// delivering frames entirely, so it must tick a few times per
    /// `silence_timeout_ms`.
    pub watchdog_interval_ms: u64,
    /// Minimum transcript length in characters; shorter results are dropped.
    pub min_transcript_chars: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            silence_timeout_ms: 1_200,
            watchdog_interval_ms: 500,
            min_transcript_chars: 2,
        }
    }
}

impl EndpointConfig {
    /// Silence timeout as a [`Duration`].
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms)
    }

    /// Watchdog interval as a [`Duration`].
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }
}

/// Playback and barge-in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Interval in ms after playback starts during which barge-in is
    /// disallowed, so the companion's own voice bleeding into capture cannot
    /// self-interrupt.
    pub grace_period_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { grace_period_ms: 500 }
    }
}

impl PlaybackConfig {
    /// Grace period as a [`Duration`].
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Wall-clock bounds on external engine calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout in ms for a single transcription call.
    pub transcribe_timeout_ms: u64,
    /// Timeout in ms for a single synthesis call.
    pub synthesize_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transcribe_timeout_ms: 10_000,
            synthesize_timeout_ms: 30_000,
        }
    }
}

impl EngineConfig {
    /// Transcription timeout as a [`Duration`].
    pub fn transcribe_timeout(&self) -> Duration {
        Duration::from_millis(self.transcribe_timeout_ms)
    }

    /// Synthesis timeout as a [`Duration`].
    pub fn synthesize_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesize_timeout_ms)
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| VoiceError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| VoiceError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate cross-field constraints that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-exact decimation ratio, a zero VAD window,
    /// or a watchdog interval that cannot observe the silence timeout.
    pub fn validate(&self) -> Result<()> {
        self.audio.decimation()?;
        if self.vad.window_samples == 0 {
            return Err(VoiceError::Config("vad.window_samples must be non-zero".into()));
        }
        if self.endpoint.watchdog_interval_ms == 0 {
            return Err(VoiceError::Config("endpoint.watchdog_interval_ms must be non-zero".into()));
        }
        if self.endpoint.watchdog_interval_ms > self.endpoint.silence_timeout_ms {
            return Err(VoiceError::Config(
                "endpoint.watchdog_interval_ms must not exceed endpoint.silence_timeout_ms".into(),
            ));
        }
        Ok(())
    }
}
