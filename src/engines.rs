//! Contracts for the external collaborators the pipeline drives.
//!
//! The surrounding application supplies the actual speech models, the
//! conversational logic, and the transport output stream; the pipeline only
//! depends on these traits. Implementations return `anyhow::Result` so any
//! backend can surface its own error type; the pipeline maps failures into
//! [`crate::error::VoiceError`] at the call site.

use crate::session::messages::SpeakerId;
use async_trait::async_trait;
use bytes::Bytes;

/// Speech probability model consulted by the voice activity detector.
///
/// Input is one evaluation window of mono pipeline-rate samples normalized
/// to \[-1, 1\]. The call is expected to be fast relative to the real-time
/// audio cadence — it runs on the capture context. A failing call degrades
/// the detector to its energy fallback for that window only.
pub trait SpeechModel: Send + Sync {
    /// Speech probability in \[0, 1\] for the given window.
    fn probability(&self, window: &[f32]) -> anyhow::Result<f32>;
}

/// Speech-to-text engine.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    /// Transcribe a contiguous utterance of mono samples at `sample_rate`.
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> anyhow::Result<String>;
}

/// Text-to-speech engine.
///
/// Output is interleaved signed 16-bit PCM little-endian bytes in the
/// session's configured output format (48kHz stereo by default). In-flight
/// calls are cancelled cooperatively: the pipeline drops the future and
/// discards any result.
#[async_trait]
pub trait SynthesisEngine: Send + Sync {
    /// Synthesize `text` into output-format PCM bytes.
    async fn synthesize(&self, text: &str) -> anyhow::Result<Bytes>;
}

/// The conversational logic that turns a transcript into a reply.
#[async_trait]
pub trait ConversationHandler: Send + Sync {
    /// Produce a spoken reply for a finished utterance.
    ///
    /// `Ok(None)` means this turn gets no spoken reply (e.g. the application
    /// answered in a text channel instead); no playback starts.
    async fn handle_utterance(
        &self,
        speaker: SpeakerId,
        text: &str,
    ) -> anyhow::Result<Option<String>>;
}

/// Output stream of the voice transport.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Stream PCM bytes to the transport; resolves when playback finishes.
    async fn play(&self, pcm: Bytes) -> anyhow::Result<()>;

    /// Stop the output stream mid-play. Best effort; must be safe to call
    /// when nothing is playing.
    async fn stop(&self) -> anyhow::Result<()>;
}

/// Interleave mono f32 samples into stereo signed 16-bit PCM bytes.
///
/// Convenience for [`SynthesisEngine`] implementations whose models produce
/// mono floating-point audio.
pub fn mono_f32_to_stereo_pcm(samples: &[f32]) -> Bytes {
    let mut out = Vec::with_capacity(samples.len() * 4);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * 32_767.0) as i16;
        let le = value.to_le_bytes();
        out.extend_from_slice(&le);
        out.extend_from_slice(&le);
    }
    Bytes::from(out)
}
