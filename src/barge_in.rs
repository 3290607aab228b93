//! Barge-in: user speech interrupting the companion's own playback.

use crate::playback::PlaybackSession;
use crate::session::messages::SpeakerId;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

/// Decides, on each detected speech window, whether active playback should
/// be cancelled, and performs the cancellation plus its side effects.
///
/// Called synchronously from the capture context; all internal state is
/// lock-guarded, and the underlying session cancellation is first-wins, so
/// concurrent windows from multiple speakers race safely — later calls on
/// an already-terminal session are no-ops.
#[derive(Default)]
pub struct BargeInController {
    counters: Mutex<HashMap<SpeakerId, u64>>,
    last_interrupter: Mutex<Option<SpeakerId>>,
}

impl BargeInController {
    /// Create a controller with empty interruption stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interrupt `session` if it is audible and past its grace period.
    ///
    /// Returns `true` only when this call performed the cancellation; the
    /// interrupting speaker is then recorded for conversational continuity.
    pub fn maybe_interrupt(
        &self,
        speaker: SpeakerId,
        session: Option<&PlaybackSession>,
    ) -> bool {
        let Some(session) = session else {
            return false;
        };
        if !session.interrupt() {
            return false;
        }

        info!("barge-in: speaker {speaker} interrupted playback");
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(speaker).or_insert(0) += 1;
        }
        if let Ok(mut last) = self.last_interrupter.lock() {
            *last = Some(speaker);
        }
        true
    }

    /// How many times `speaker` has interrupted playback this session.
    pub fn interruptions(&self, speaker: SpeakerId) -> u64 {
        self.counters
            .lock()
            .ok()
            .and_then(|counters| counters.get(&speaker).copied())
            .unwrap_or(0)
    }

    /// The most recent interrupting speaker, if any.
    pub fn last_interrupter(&self) -> Option<SpeakerId> {
        self.last_interrupter.lock().ok().and_then(|last| *last)
    }
}
