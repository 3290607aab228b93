//! Utterance endpointing: per-speaker speech-boundary tracking.
//!
//! Each speaker moves `Silent → Speaking → Silent`; finalization is a
//! transition, not a resting state. Finalization is time-based and
//! watchdog-only: a transient misclassified silence window cannot fragment
//! an utterance, and speakers whose transport stops delivering frames
//! entirely are still finalized. A single actor task owns the speaker map,
//! so exactly one tick can finalize a given utterance.

use crate::config::EndpointConfig;
use crate::session::messages::{CaptureEvent, FinalizedUtterance, SpeakerId, Utterance};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Per-speaker utterance state machine.
///
/// Owned by the endpointing actor; not shared across contexts.
pub struct UtteranceTracker {
    silence_timeout: std::time::Duration,
    live: HashMap<SpeakerId, Utterance>,
}

impl UtteranceTracker {
    /// Create a tracker finalizing after `silence_timeout` of trailing
    /// silence.
    pub fn new(silence_timeout: std::time::Duration) -> Self {
        Self {
            silence_timeout,
            live: HashMap::new(),
        }
    }

    /// Record one speech-classified window for `speaker`.
    ///
    /// Creates a live utterance on the first speech window after silence,
    /// otherwise appends and refreshes the last-speech timestamp.
    pub fn on_speech_window(&mut self, speaker: SpeakerId, samples: Vec<f32>, at: Instant) {
        match self.live.get_mut(&speaker) {
            Some(utterance) => {
                utterance.windows.push(samples);
                utterance.last_speech_at = at;
            }
            None => {
                info!("speaker {speaker} started speaking");
                self.live.insert(
                    speaker,
                    Utterance {
                        speaker,
                        windows: vec![samples],
                        started_at: at,
                        last_speech_at: at,
                    },
                );
            }
        }
    }

    /// Finalize every live utterance whose trailing silence has reached the
    /// timeout, clearing each speaker's live slot.
    ///
    /// The watchdog entry point: removal happens before anything
    /// asynchronous touches the utterance, so a finalize can never be
    /// observed twice.
    pub fn finalize_idle(&mut self, now: Instant) -> Vec<FinalizedUtterance> {
        let ready: Vec<SpeakerId> = self
            .live
            .iter()
            .filter(|(_, utterance)| {
                now.duration_since(utterance.last_speech_at) >= self.silence_timeout
            })
            .map(|(speaker, _)| *speaker)
            .collect();

        ready
            .into_iter()
            .filter_map(|speaker| self.live.remove(&speaker))
            .map(Utterance::finalize)
            .collect()
    }

    /// Discard any live utterance for a departed speaker.
    ///
    /// Returns `true` if mid-utterance state was dropped.
    pub fn remove_speaker(&mut self, speaker: SpeakerId) -> bool {
        self.live.remove(&speaker).is_some()
    }

    /// Whether `speaker` currently has a live utterance.
    pub fn is_speaking(&self, speaker: SpeakerId) -> bool {
        self.live.contains_key(&speaker)
    }

    /// Number of speakers with a live utterance.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Drop all live state (session teardown).
    pub fn clear(&mut self) {
        if !self.live.is_empty() {
            debug!("discarding {} live utterance(s) on teardown", self.live.len());
            self.live.clear();
        }
    }
}

/// Endpointing actor: consumes capture events and runs the silence watchdog.
///
/// Finalized utterances are submitted downstream for transcription. Runs
/// until cancelled or until the capture side hangs up.
pub(crate) async fn run_endpoint_stage(
    config: EndpointConfig,
    mut events: mpsc::Receiver<CaptureEvent>,
    finalized_tx: mpsc::Sender<FinalizedUtterance>,
    cancel: CancellationToken,
) {
    let mut tracker = UtteranceTracker::new(config.silence_timeout());
    let mut watchdog = tokio::time::interval(config.watchdog_interval());
    watchdog.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = watchdog.tick() => {
                for utterance in tracker.finalize_idle(Instant::now()) {
                    info!(
                        "end of speech for speaker {} ({} samples), submitting for transcription",
                        utterance.speaker,
                        utterance.samples.len()
                    );
                    if finalized_tx.send(utterance).await.is_err() {
                        tracker.clear();
                        return;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Some(CaptureEvent::SpeechWindow { speaker, samples, at }) => {
                        tracker.on_speech_window(speaker, samples, at);
                    }
                    Some(CaptureEvent::SpeakerLeft(speaker)) => {
                        if tracker.remove_speaker(speaker) {
                            info!("discarded live utterance of departed speaker {speaker}");
                        }
                    }
                    None => break,
                }
            }
        }
    }

    tracker.clear();
}
