//! End-to-end pipeline tests with mock engines.
//!
//! Drives the orchestrator the way a transport would: synchronous frame
//! delivery into the capture sink, assertions on what reaches the mock
//! transcriber / handler / output sink and on playback state transitions.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use banter::{
    AudioSink, BargeInController, CaptureSink, ConversationHandler, PlaybackSlot, PlaybackState,
    SessionConfig, SessionEngines, SpeakerId, SynthesisEngine, TranscriptionEngine,
    VoiceSessionOrchestrator,
};
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ── mock engines ─────────────────────────────────────────────────

enum TranscriptMode {
    Fixed(&'static str),
    Fail,
}

struct MockTranscriber {
    mode: TranscriptMode,
    calls: AtomicUsize,
    sample_counts: Mutex<Vec<usize>>,
}

impl MockTranscriber {
    fn fixed(text: &'static str) -> Arc<Self> {
        Arc::new(Self {
            mode: TranscriptMode::Fixed(text),
            calls: AtomicUsize::new(0),
            sample_counts: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            mode: TranscriptMode::Fail,
            calls: AtomicUsize::new(0),
            sample_counts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionEngine for MockTranscriber {
    async fn transcribe(&self, samples: &[f32], _sample_rate: u32) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sample_counts.lock().unwrap().push(samples.len());
        match self.mode {
            TranscriptMode::Fixed(text) => Ok(text.to_owned()),
            TranscriptMode::Fail => anyhow::bail!("speech model backend offline"),
        }
    }
}

struct MockHandler {
    reply: Option<&'static str>,
    calls: Mutex<Vec<(SpeakerId, String)>>,
}

impl MockHandler {
    fn replying(reply: &'static str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn silent() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(SpeakerId, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationHandler for MockHandler {
    async fn handle_utterance(
        &self,
        speaker: SpeakerId,
        text: &str,
    ) -> anyhow::Result<Option<String>> {
        self.calls.lock().unwrap().push((speaker, text.to_owned()));
        Ok(self.reply.map(str::to_owned))
    }
}

struct MockSynth;

#[async_trait]
impl SynthesisEngine for MockSynth {
    async fn synthesize(&self, _text: &str) -> anyhow::Result<Bytes> {
        Ok(Bytes::from_static(&[0, 1, 2, 3]))
    }
}

struct MockSink {
    plays: AtomicUsize,
    stops: AtomicUsize,
    hold_playback: bool,
}

impl MockSink {
    fn new(hold_playback: bool) -> Arc<Self> {
        Arc::new(Self {
            plays: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            hold_playback,
        })
    }
}

#[async_trait]
impl AudioSink for MockSink {
    async fn play(&self, _pcm: Bytes) -> anyhow::Result<()> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        if self.hold_playback {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── harness ──────────────────────────────────────────────────────

/// Window size in samples for the fast test config.
const WINDOW: usize = 160;

/// Compressed timings so scenarios complete in tens of milliseconds.
fn fast_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    // Mono 1:1 transport keeps test frames literal.
    config.audio.transport_sample_rate = 16_000;
    config.audio.transport_channels = 1;
    config.vad.window_samples = WINDOW;
    config.endpoint.silence_timeout_ms = 120;
    config.endpoint.watchdog_interval_ms = 40;
    config.playback.grace_period_ms = 10_000;
    config
}

struct TestSession {
    playback: PlaybackSlot,
    barge_in: Arc<BargeInController>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<banter::Result<()>>,
}

impl TestSession {
    fn launch(config: SessionConfig, engines: SessionEngines) -> (Self, CaptureSink) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let mut orchestrator = VoiceSessionOrchestrator::new(config, engines).unwrap();
        let capture = orchestrator.capture_sink().unwrap();
        let playback = orchestrator.playback();
        let barge_in = orchestrator.barge_in();
        let cancel = orchestrator.cancel_token();
        let task = tokio::spawn(orchestrator.run());
        (
            Self {
                playback,
                barge_in,
                cancel,
                task,
            },
            capture,
        )
    }

    async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

fn speech_frame() -> Vec<i16> {
    vec![12_000; WINDOW]
}

fn silence_frame() -> Vec<i16> {
    vec![0; WINDOW]
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 2s");
}

fn playing(slot: &PlaybackSlot) -> bool {
    slot.current()
        .is_some_and(|session| session.state() == PlaybackState::Playing)
}

// ── scenarios ────────────────────────────────────────────────────

#[tokio::test]
async fn watchdog_finalizes_one_utterance_after_speech_stops() {
    // 40 windows of silence, two of speech, then nothing more from that
    // speaker: the watchdog must finalize exactly one utterance containing
    // the two speech windows.
    let transcriber = MockTranscriber::fixed("could you dim the lights");
    let handler = MockHandler::silent();
    let (session, mut capture) = TestSession::launch(
        fast_config(),
        SessionEngines {
            transcriber: Arc::clone(&transcriber) as Arc<dyn TranscriptionEngine>,
            synthesizer: Arc::new(MockSynth),
            handler: Arc::clone(&handler) as Arc<dyn ConversationHandler>,
            sink: MockSink::new(false),
        },
    );
    let speaker = SpeakerId(41);

    for _ in 0..40 {
        capture.on_frame(speaker, &silence_frame());
    }
    capture.on_frame(speaker, &speech_frame());
    capture.on_frame(speaker, &speech_frame());

    wait_until(|| transcriber.calls() == 1).await;
    assert_eq!(transcriber.sample_counts.lock().unwrap()[0], 2 * WINDOW);

    // The live utterance was cleared: no second finalization ever happens.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(transcriber.calls(), 1);

    let calls = handler.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, speaker);
    assert_eq!(calls[0].1, "could you dim the lights");

    session.shutdown().await;
}

#[tokio::test]
async fn speech_inside_grace_period_does_not_interrupt() {
    let sink = MockSink::new(true);
    let (session, mut capture) = TestSession::launch(
        fast_config(), // 10s grace period
        SessionEngines {
            transcriber: MockTranscriber::fixed("tell me a story"),
            synthesizer: Arc::new(MockSynth),
            handler: MockHandler::replying("happy to help"),
            sink: Arc::clone(&sink) as Arc<dyn AudioSink>,
        },
    );

    capture.on_frame(SpeakerId(1), &speech_frame());
    wait_until(|| playing(&session.playback)).await;

    // Another speaker barges in right after playback starts.
    capture.on_frame(SpeakerId(2), &speech_frame());

    let active = session.playback.current().unwrap();
    assert_eq!(active.state(), PlaybackState::Playing);
    assert_eq!(session.barge_in.interruptions(SpeakerId(2)), 0);
    assert!(session.barge_in.last_interrupter().is_none());

    session.shutdown().await;
}

#[tokio::test]
async fn speech_after_grace_period_cancels_playback() {
    let mut config = fast_config();
    config.playback.grace_period_ms = 80;

    let sink = MockSink::new(true);
    let (session, mut capture) = TestSession::launch(
        config,
        SessionEngines {
            transcriber: MockTranscriber::fixed("tell me a story"),
            synthesizer: Arc::new(MockSynth),
            handler: MockHandler::replying("once upon a time"),
            sink: Arc::clone(&sink) as Arc<dyn AudioSink>,
        },
    );

    capture.on_frame(SpeakerId(1), &speech_frame());
    wait_until(|| playing(&session.playback)).await;
    let active = session.playback.current().unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    capture.on_frame(SpeakerId(2), &speech_frame());

    assert_eq!(active.state(), PlaybackState::Cancelled);
    assert_eq!(session.barge_in.interruptions(SpeakerId(2)), 1);
    assert_eq!(session.barge_in.last_interrupter(), Some(SpeakerId(2)));

    // A later cancel on the same session is a no-op with the same state.
    assert!(!active.cancel());
    assert_eq!(active.state(), PlaybackState::Cancelled);

    wait_until(|| sink.stops.load(Ordering::SeqCst) == 1).await;

    session.shutdown().await;
}

#[tokio::test]
async fn transcription_failure_reaches_neither_handler_nor_playback() {
    let transcriber = MockTranscriber::failing();
    let handler = MockHandler::replying("should never be spoken");
    let sink = MockSink::new(false);
    let (session, mut capture) = TestSession::launch(
        fast_config(),
        SessionEngines {
            transcriber: Arc::clone(&transcriber) as Arc<dyn TranscriptionEngine>,
            synthesizer: Arc::new(MockSynth),
            handler: Arc::clone(&handler) as Arc<dyn ConversationHandler>,
            sink: Arc::clone(&sink) as Arc<dyn AudioSink>,
        },
    );

    capture.on_frame(SpeakerId(1), &speech_frame());
    wait_until(|| transcriber.calls() == 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(handler.calls().is_empty());
    assert_eq!(sink.plays.load(Ordering::SeqCst), 0);

    session.shutdown().await;
}

// ── turn filtering ───────────────────────────────────────────────

#[tokio::test]
async fn too_short_transcript_is_discarded_silently() {
    let transcriber = MockTranscriber::fixed("a");
    let handler = MockHandler::replying("pardon?");
    let sink = MockSink::new(false);
    let (session, mut capture) = TestSession::launch(
        fast_config(),
        SessionEngines {
            transcriber: Arc::clone(&transcriber) as Arc<dyn TranscriptionEngine>,
            synthesizer: Arc::new(MockSynth),
            handler: Arc::clone(&handler) as Arc<dyn ConversationHandler>,
            sink: Arc::clone(&sink) as Arc<dyn AudioSink>,
        },
    );

    capture.on_frame(SpeakerId(1), &speech_frame());
    wait_until(|| transcriber.calls() == 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(handler.calls().is_empty());
    assert_eq!(sink.plays.load(Ordering::SeqCst), 0);

    session.shutdown().await;
}

#[tokio::test]
async fn handler_declining_to_reply_starts_no_playback() {
    let handler = MockHandler::silent();
    let sink = MockSink::new(false);
    let (session, mut capture) = TestSession::launch(
        fast_config(),
        SessionEngines {
            transcriber: MockTranscriber::fixed("just thinking out loud"),
            synthesizer: Arc::new(MockSynth),
            handler: Arc::clone(&handler) as Arc<dyn ConversationHandler>,
            sink: Arc::clone(&sink) as Arc<dyn AudioSink>,
        },
    );

    capture.on_frame(SpeakerId(1), &speech_frame());
    wait_until(|| !handler.calls().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(sink.plays.load(Ordering::SeqCst), 0);
    assert!(session.playback.current().is_none());

    session.shutdown().await;
}

// ── preemption & teardown ────────────────────────────────────────

#[tokio::test]
async fn new_response_preempts_leftover_playback_even_inside_grace() {
    let sink = MockSink::new(true);
    let (session, mut capture) = TestSession::launch(
        fast_config(), // 10s grace period: only preemption can cancel
        SessionEngines {
            transcriber: MockTranscriber::fixed("and another thing"),
            synthesizer: Arc::new(MockSynth),
            handler: MockHandler::replying("noted"),
            sink: Arc::clone(&sink) as Arc<dyn AudioSink>,
        },
    );
    let speaker = SpeakerId(1);

    capture.on_frame(speaker, &speech_frame());
    wait_until(|| playing(&session.playback)).await;
    let first = session.playback.current().unwrap();

    // The same speaker talks again; the new turn's response must replace
    // the first playback.
    capture.on_frame(speaker, &speech_frame());
    wait_until(|| first.state() == PlaybackState::Cancelled).await;
    wait_until(|| sink.plays.load(Ordering::SeqCst) == 2).await;
    wait_until(|| playing(&session.playback)).await;

    session.shutdown().await;
}

#[tokio::test]
async fn teardown_cancels_active_playback() {
    let sink = MockSink::new(true);
    let (session, mut capture) = TestSession::launch(
        fast_config(),
        SessionEngines {
            transcriber: MockTranscriber::fixed("goodnight"),
            synthesizer: Arc::new(MockSynth),
            handler: MockHandler::replying("sleep well"),
            sink: Arc::clone(&sink) as Arc<dyn AudioSink>,
        },
    );

    capture.on_frame(SpeakerId(1), &speech_frame());
    wait_until(|| playing(&session.playback)).await;
    let active = session.playback.current().unwrap();

    session.shutdown().await;
    assert_eq!(active.state(), PlaybackState::Cancelled);

    drop(capture);
}

#[tokio::test]
async fn departed_speaker_never_produces_a_turn() {
    let transcriber = MockTranscriber::fixed("wait don't go");
    let (session, mut capture) = TestSession::launch(
        fast_config(),
        SessionEngines {
            transcriber: Arc::clone(&transcriber) as Arc<dyn TranscriptionEngine>,
            synthesizer: Arc::new(MockSynth),
            handler: MockHandler::replying("farewell"),
            sink: MockSink::new(false),
        },
    );

    capture.on_frame(SpeakerId(1), &speech_frame());
    capture.speaker_left(SpeakerId(1));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(transcriber.calls(), 0);

    session.shutdown().await;
}

// ── construction ─────────────────────────────────────────────────

#[tokio::test]
async fn invalid_audio_format_is_rejected_at_construction() {
    let mut config = SessionConfig::default();
    config.audio.transport_sample_rate = 44_100;

    let result = VoiceSessionOrchestrator::new(
        config,
        SessionEngines {
            transcriber: MockTranscriber::fixed("x"),
            synthesizer: Arc::new(MockSynth),
            handler: MockHandler::silent(),
            sink: MockSink::new(false),
        },
    );
    assert!(result.is_err());
}

#[tokio::test]
async fn capture_sink_can_only_be_taken_once() {
    let mut orchestrator = VoiceSessionOrchestrator::new(
        fast_config(),
        SessionEngines {
            transcriber: MockTranscriber::fixed("x"),
            synthesizer: Arc::new(MockSynth),
            handler: MockHandler::silent(),
            sink: MockSink::new(false),
        },
    )
    .unwrap();

    assert!(orchestrator.capture_sink().is_ok());
    assert!(orchestrator.capture_sink().is_err());
}
