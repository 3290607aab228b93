//! Per-speaker ingestion of transport capture frames.
//!
//! The transport delivers interleaved 16-bit PCM frames on its own delivery
//! thread (the capture context). Everything here is synchronous and bounded
//! in latency: decimate, buffer, slice evaluation windows, classify, and
//! hand speech windows to the session context over a bounded channel with
//! `try_send`. Transcription and synthesis never run on this path.

use crate::barge_in::BargeInController;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::playback::PlaybackSlot;
use crate::session::messages::{CaptureEvent, SpeakerId};
use crate::vad::VoiceActivityDetector;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Per-speaker accumulator slicing the decimated stream into fixed windows.
///
/// Holds at most one unconsumed partial window plus the tail of the latest
/// frame; fully consumed windows are evicted, so the buffer never grows
/// unbounded.
pub struct WindowBuffer {
    decimation: usize,
    window_samples: usize,
    /// Decimated mono samples awaiting windowing.
    pending: Vec<i16>,
    /// Offset into the next frame of the next sample to keep, so the
    /// decimation grid stays aligned across frame boundaries.
    phase: usize,
}

impl WindowBuffer {
    /// Create a buffer taking every `decimation`-th interleaved sample and
    /// emitting windows of `window_samples` mono samples.
    pub fn new(decimation: usize, window_samples: usize) -> Self {
        Self {
            decimation,
            window_samples,
            pending: Vec::with_capacity(window_samples * 2),
            phase: 0,
        }
    }

    /// Append one interleaved transport frame, keeping every
    /// `decimation`-th sample.
    pub fn extend(&mut self, frame: &[i16]) {
        let mut i = self.phase;
        while i < frame.len() {
            self.pending.push(frame[i]);
            i += self.decimation;
        }
        self.phase = i - frame.len();
    }

    /// Slice off exactly one full window as normalized f32 samples,
    /// consuming it from the buffer. `None` until a full window is
    /// available.
    pub fn drain_window(&mut self) -> Option<Vec<f32>> {
        if self.pending.len() < self.window_samples {
            return None;
        }
        let tail = self.pending.split_off(self.window_samples);
        let window = std::mem::replace(&mut self.pending, tail);
        Some(window.iter().map(|&s| f32::from(s) / 32_768.0).collect())
    }

    /// Number of buffered samples awaiting a full window.
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }
}

/// Capture-context entry point for the voice session.
///
/// Owned by whatever drives the transport's delivery callback; methods are
/// synchronous and must be called from that single context. Speech windows
/// are handed to the session context over a bounded channel; if the session
/// context falls behind, windows are dropped rather than blocking the
/// transport callback.
pub struct CaptureSink {
    decimation: usize,
    window_samples: usize,
    threshold: f32,
    detector: VoiceActivityDetector,
    buffers: HashMap<SpeakerId, WindowBuffer>,
    barge_in: Arc<BargeInController>,
    playback: PlaybackSlot,
    events: mpsc::Sender<CaptureEvent>,
}

impl CaptureSink {
    pub(crate) fn new(
        config: &SessionConfig,
        detector: VoiceActivityDetector,
        barge_in: Arc<BargeInController>,
        playback: PlaybackSlot,
        events: mpsc::Sender<CaptureEvent>,
    ) -> Result<Self> {
        Ok(Self {
            decimation: config.audio.decimation()?,
            window_samples: config.vad.window_samples,
            threshold: config.vad.threshold,
            detector,
            buffers: HashMap::new(),
            barge_in,
            playback,
            events,
        })
    }

    /// Ingest one interleaved PCM frame for `speaker`.
    ///
    /// Slices and classifies every full evaluation window. Each speech
    /// window first consults the barge-in controller, then crosses to the
    /// session context.
    pub fn on_frame(&mut self, speaker: SpeakerId, frame: &[i16]) {
        let (decimation, window_samples) = (self.decimation, self.window_samples);
        let buffer = self
            .buffers
            .entry(speaker)
            .or_insert_with(|| WindowBuffer::new(decimation, window_samples));
        buffer.extend(frame);

        while let Some(window) = buffer.drain_window() {
            if !self.detector.is_speech(&window, self.threshold) {
                continue;
            }

            self.barge_in
                .maybe_interrupt(speaker, self.playback.current().as_ref());

            let event = CaptureEvent::SpeechWindow {
                speaker,
                samples: window,
                at: Instant::now(),
            };
            if self.events.try_send(event).is_err() {
                debug!("session channel full, dropping speech window for {speaker}");
            }
        }
    }

    /// Pre-create per-speaker state when the transport announces a join.
    ///
    /// Optional; state is also created lazily on the first frame.
    pub fn speaker_joined(&mut self, speaker: SpeakerId) {
        let (decimation, window_samples) = (self.decimation, self.window_samples);
        self.buffers
            .entry(speaker)
            .or_insert_with(|| WindowBuffer::new(decimation, window_samples));
    }

    /// Destroy per-speaker state when the transport announces a leave.
    ///
    /// Any partial window is discarded here; any live utterance is discarded
    /// by the session context.
    pub fn speaker_left(&mut self, speaker: SpeakerId) {
        self.buffers.remove(&speaker);
        if self
            .events
            .try_send(CaptureEvent::SpeakerLeft(speaker))
            .is_err()
        {
            warn!("could not notify session context that {speaker} left");
        }
    }

    /// Speakers with per-speaker capture state.
    pub fn tracked_speakers(&self) -> usize {
        self.buffers.len()
    }
}
