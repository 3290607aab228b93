//! Banter: real-time multi-speaker audio pipeline for a voice-chat
//! companion.
//!
//! Listens to live multi-speaker audio from a voice transport, detects
//! speech boundaries per speaker, transcribes finished utterances, drives a
//! conversational reply, and speaks it back while remaining interruptible
//! ("barge-in").
//!
//! # Architecture
//!
//! Capture and output flow in opposite directions through independent
//! stages connected by async channels:
//!
//! ```text
//! transport frames → windowing → VAD → endpointing → STT → handler
//!                                 │                           │
//!                            barge-in ◄── playback ◄── TTS ◄──┘
//! ```
//!
//! The transport, the speech models, and the conversational logic are
//! external collaborators behind the traits in [`engines`]; this crate owns
//! the timing and cancellation discipline: silence-based endpointing with a
//! watchdog, one playback session at a time, and a grace period that keeps
//! the companion's own voice from interrupting itself.

pub mod audio;
pub mod barge_in;
pub mod config;
pub mod endpoint;
pub mod engines;
pub mod error;
pub mod playback;
pub mod session;
pub mod vad;

pub use audio::ingest::{CaptureSink, WindowBuffer};
pub use barge_in::BargeInController;
pub use config::SessionConfig;
pub use engines::{
    AudioSink, ConversationHandler, SpeechModel, SynthesisEngine, TranscriptionEngine,
};
pub use error::{Result, VoiceError};
pub use playback::{PlaybackSession, PlaybackSlot, PlaybackState};
pub use session::messages::SpeakerId;
pub use session::orchestrator::{SessionEngines, VoiceSessionOrchestrator};
