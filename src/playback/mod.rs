//! Cancellable synthesis + output-streaming sessions.
//!
//! A [`PlaybackSession`] represents "the companion is currently trying to
//! speak": one synthesis call followed by one streaming write to the
//! transport's output sink, driven by a background task. The session is a
//! small state machine whose terminal transitions happen synchronously
//! under the state lock, so cancellation is observable immediately from any
//! context and is idempotent.
//!
//! At most one session system-wide is non-terminal at a time; the
//! [`PlaybackSlot`] models that single output stream as an explicitly owned
//! resource. "Idle" is the slot holding no live session.

use crate::engines::{AudioSink, SynthesisEngine};
use crate::error::VoiceError;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Observable state of a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// The synthesis call is in flight.
    Synthesizing,
    /// Audio is streaming to the output sink.
    Playing,
    /// Finished: played to the end, or degraded to a no-op on synthesis
    /// failure or empty audio.
    Completed,
    /// Cancelled before or during playback.
    Cancelled,
}

impl PlaybackState {
    /// Whether the session has reached a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Internal state; `Playing` carries the timestamp the grace period is
/// computed from.
#[derive(Debug, Clone, Copy)]
enum State {
    Synthesizing,
    Playing { since: Instant },
    Completed,
    Cancelled,
}

struct Shared {
    state: Mutex<State>,
    cancel: CancellationToken,
    grace_period: Duration,
}

impl Shared {
    /// Transition to `Completed` unless already terminal.
    fn complete(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match *state {
            State::Completed | State::Cancelled => {}
            _ => *state = State::Completed,
        }
    }

    /// Transition `Synthesizing` → `Playing`, recording the start timestamp.
    ///
    /// Returns `false` if cancellation won the race, in which case the
    /// synthesized audio must be discarded unplayed.
    fn begin_playing(&self) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        match *state {
            State::Synthesizing => {
                *state = State::Playing {
                    since: Instant::now(),
                };
                true
            }
            _ => false,
        }
    }
}

/// One speech-synthesis + playback operation.
///
/// Cloning yields another handle to the same session; the driving work runs
/// on a spawned task. All cancellation paths are safe to call from a
/// different context than the one driving the session (the ingestion side
/// calls [`cancel`](Self::cancel) while playback runs on its own task).
#[derive(Clone)]
pub struct PlaybackSession {
    shared: Arc<Shared>,
}

impl PlaybackSession {
    /// Launch a session for `text`: synthesize, then stream to `sink`.
    ///
    /// The session starts in `Synthesizing`. Synthesis is bounded by
    /// `synthesis_timeout` and cancelled cooperatively (the in-flight call
    /// is dropped and any result discarded). Synthesis failure, timeout, or
    /// empty audio completes the session as a no-op rather than surfacing
    /// an error turn to the user.
    pub fn start(
        text: String,
        synthesizer: Arc<dyn SynthesisEngine>,
        sink: Arc<dyn AudioSink>,
        grace_period: Duration,
        synthesis_timeout: Duration,
    ) -> Self {
        let preview: String = text.chars().take(48).collect();
        info!("starting speech synthesis: \"{preview}\"");

        let shared = Arc::new(Shared {
            state: Mutex::new(State::Synthesizing),
            cancel: CancellationToken::new(),
            grace_period,
        });
        tokio::spawn(drive(
            Arc::clone(&shared),
            text,
            synthesizer,
            sink,
            synthesis_timeout,
        ));
        Self { shared }
    }

    /// Snapshot of the session state.
    pub fn state(&self) -> PlaybackState {
        let Ok(state) = self.shared.state.lock() else {
            return PlaybackState::Cancelled;
        };
        match *state {
            State::Synthesizing => PlaybackState::Synthesizing,
            State::Playing { .. } => PlaybackState::Playing,
            State::Completed => PlaybackState::Completed,
            State::Cancelled => PlaybackState::Cancelled,
        }
    }

    /// Whether the session has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Request cancellation.
    ///
    /// Honored during synthesis and during playback once the grace period
    /// has elapsed; refused (returning `false`) inside the grace period so
    /// the companion's own voice cannot reflexively self-interrupt. Returns
    /// `false` on an already-terminal session (repeat calls are no-ops that
    /// leave the same terminal state).
    pub fn cancel(&self) -> bool {
        self.cancel_inner(true)
    }

    /// Unconditional cancellation, bypassing the grace period.
    ///
    /// Used when a new user-driven response replaces leftover playback: a
    /// finalized utterance is real speech, not capture bleed-through, so the
    /// grace period does not apply.
    pub fn preempt(&self) -> bool {
        self.cancel_inner(false)
    }

    /// Cancel only an audible session: `Playing` and past the grace period.
    ///
    /// The barge-in path; a session still synthesizing is left alone.
    pub(crate) fn interrupt(&self) -> bool {
        {
            let Ok(mut state) = self.shared.state.lock() else {
                return false;
            };
            match *state {
                State::Playing { since } if since.elapsed() >= self.shared.grace_period => {
                    *state = State::Cancelled;
                }
                State::Playing { .. } => {
                    debug!("interrupt ignored inside grace period");
                    return false;
                }
                _ => return false,
            }
        }
        self.shared.cancel.cancel();
        info!("playback session cancelled");
        true
    }

    fn cancel_inner(&self, honor_grace: bool) -> bool {
        {
            let Ok(mut state) = self.shared.state.lock() else {
                return false;
            };
            match *state {
                State::Synthesizing => *state = State::Cancelled,
                State::Playing { since } => {
                    if honor_grace && since.elapsed() < self.shared.grace_period {
                        debug!("cancellation ignored inside grace period");
                        return false;
                    }
                    *state = State::Cancelled;
                }
                State::Completed | State::Cancelled => return false,
            }
        }
        self.shared.cancel.cancel();
        info!("playback session cancelled");
        true
    }
}

/// Background task driving one session from `Synthesizing` to a terminal
/// state.
async fn drive(
    shared: Arc<Shared>,
    text: String,
    synthesizer: Arc<dyn SynthesisEngine>,
    sink: Arc<dyn AudioSink>,
    synthesis_timeout: Duration,
) {
    let audio: Bytes = tokio::select! {
        () = shared.cancel.cancelled() => {
            debug!("synthesis cancelled in flight");
            return;
        }
        result = timeout(synthesis_timeout, synthesizer.synthesize(&text)) => match result {
            Err(_) => {
                error!("{}", VoiceError::Synthesis(format!(
                    "timed out after {}ms", synthesis_timeout.as_millis()
                )));
                shared.complete();
                return;
            }
            Ok(Err(e)) => {
                error!("{}", VoiceError::Synthesis(e.to_string()));
                shared.complete();
                return;
            }
            Ok(Ok(audio)) => audio,
        }
    };

    if audio.is_empty() {
        info!("synthesis produced no audio, completing as no-op");
        shared.complete();
        return;
    }

    // Cancellation may have landed between the synthesis result and here;
    // the audio is discarded unplayed in that case.
    if !shared.begin_playing() {
        debug!("cancellation observed before playback, discarding audio");
        return;
    }

    info!("streaming {} bytes of audio to output", audio.len());
    tokio::select! {
        () = shared.cancel.cancelled() => {
            if let Err(e) = sink.stop().await {
                warn!("output stream stop failed: {e}");
            }
            info!("playback stopped");
        }
        result = sink.play(audio) => {
            if let Err(e) = result {
                error!("{}", VoiceError::Playback(e.to_string()));
            }
            shared.complete();
        }
    }
}

/// The single system-wide playback slot.
///
/// Only the session-context response stage writes the slot (single-writer
/// discipline); the capture context reads the current handle to attempt a
/// barge-in cancellation.
#[derive(Clone, Default)]
pub struct PlaybackSlot {
    current: Arc<Mutex<Option<PlaybackSession>>>,
}

impl PlaybackSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the current session, if any.
    pub fn current(&self) -> Option<PlaybackSession> {
        self.current.lock().ok()?.clone()
    }

    /// Install a new session. The prior session (if any) must already have
    /// been driven to a terminal state by the caller.
    pub(crate) fn replace(&self, session: PlaybackSession) {
        if let Ok(mut current) = self.current.lock() {
            *current = Some(session);
        }
    }

    /// Remove and return the current session (session teardown).
    pub(crate) fn take(&self) -> Option<PlaybackSession> {
        self.current.lock().ok()?.take()
    }
}
