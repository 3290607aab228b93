//! Message types passed between the capture context and the session stages.

use std::fmt;
use std::time::Instant;

/// Opaque platform identifier for one speaker in the voice session.
///
/// Stable for the lifetime of the session; map key for all per-speaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpeakerId(pub u64);

impl fmt::Display for SpeakerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SpeakerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Event handed from the capture context to the endpointing stage.
#[derive(Debug)]
pub enum CaptureEvent {
    /// One evaluation window classified as speech.
    SpeechWindow {
        /// Who was speaking.
        speaker: SpeakerId,
        /// Normalized mono samples at the pipeline rate.
        samples: Vec<f32>,
        /// When the window was classified.
        at: Instant,
    },
    /// The speaker left the session; discard any live per-speaker state.
    SpeakerLeft(SpeakerId),
}

/// An in-progress utterance: consecutive speech windows for one speaker
/// between two periods of silence.
#[derive(Debug)]
pub struct Utterance {
    /// Who is speaking.
    pub speaker: SpeakerId,
    /// Accumulated speech windows in arrival order.
    pub windows: Vec<Vec<f32>>,
    /// When the first speech window was classified.
    pub started_at: Instant,
    /// When the most recent speech window was classified.
    pub last_speech_at: Instant,
}

impl Utterance {
    /// Concatenate the accumulated windows into one contiguous sample
    /// sequence, consuming the utterance.
    pub fn finalize(self) -> FinalizedUtterance {
        let total: usize = self.windows.iter().map(Vec::len).sum();
        let mut samples = Vec::with_capacity(total);
        for window in &self.windows {
            samples.extend_from_slice(window);
        }
        FinalizedUtterance {
            speaker: self.speaker,
            samples,
            started_at: self.started_at,
            last_speech_at: self.last_speech_at,
        }
    }
}

/// A finished utterance ready for transcription.
#[derive(Debug)]
pub struct FinalizedUtterance {
    /// Who spoke.
    pub speaker: SpeakerId,
    /// Contiguous mono samples at the pipeline rate.
    pub samples: Vec<f32>,
    /// When the first speech window was classified.
    pub started_at: Instant,
    /// When the last speech window was classified.
    pub last_speech_at: Instant,
}

/// A reply turn ready for synthesis and playback.
#[derive(Debug)]
pub struct ResponseTurn {
    /// The speaker whose utterance produced this reply.
    pub speaker: SpeakerId,
    /// Text to synthesize and speak.
    pub text: String,
}
